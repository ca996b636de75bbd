//! Job book: the active map, the history map, and dispatch selection.
//!
//! A job lives in exactly one of the two maps. Everything here is synchronous
//! and runs under the orchestrator's lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::model::{Job, JobId, JobStatus};

/// A job plus the bookkeeping the engine keeps beside it.
pub(crate) struct Tracked {
    pub job: Job,
    /// Set by `cancel` on a running job; honored at the next state check.
    pub cancel_requested: bool,
    /// A retried job is not eligible for dispatch before this instant.
    pub not_before: Option<Instant>,
    updates: watch::Sender<Job>,
}

impl Tracked {
    pub fn new(job: Job) -> Self {
        let (updates, _) = watch::channel(job.clone());
        Self {
            job,
            cancel_requested: false,
            not_before: None,
            updates,
        }
    }

    /// Push the current snapshot to every watcher.
    pub fn publish(&self) {
        self.updates.send_replace(self.job.clone());
    }

    pub fn watch(&self) -> watch::Receiver<Job> {
        self.updates.subscribe()
    }

    fn eligible(&self, now: Instant) -> bool {
        self.job.status == JobStatus::Pending && self.not_before.is_none_or(|t| t <= now)
    }
}

/// Counts reported by [`crate::engine::Orchestrator::queue_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub history_size: usize,
}

#[derive(Default)]
pub(crate) struct JobBook {
    active: HashMap<JobId, Tracked>,
    history: HashMap<JobId, Tracked>,
}

impl JobBook {
    pub fn insert(&mut self, tracked: Tracked) {
        self.active.insert(tracked.job.id.clone(), tracked);
    }

    pub fn active_mut(&mut self, id: &JobId) -> Option<&mut Tracked> {
        self.active.get_mut(id)
    }

    /// Look up a job wherever it currently lives.
    pub fn find(&self, id: &JobId) -> Option<&Tracked> {
        self.active.get(id).or_else(|| self.history.get(id))
    }

    pub fn in_history(&self, id: &JobId) -> bool {
        self.history.contains_key(id)
    }

    pub fn running(&self) -> usize {
        self.active
            .values()
            .filter(|t| t.job.status == JobStatus::Running)
            .count()
    }

    /// Highest-priority eligible pending job; earliest submission breaks ties.
    pub fn next_eligible(&self, now: Instant) -> Option<JobId> {
        self.active
            .values()
            .filter(|t| t.eligible(now))
            .max_by(|a, b| {
                a.job
                    .priority
                    .cmp(&b.job.priority)
                    .then_with(|| b.job.submitted_at.cmp(&a.job.submitted_at))
                    .then_with(|| b.job.id.cmp(&a.job.id))
            })
            .map(|t| t.job.id.clone())
    }

    /// Move a finished job from the active map into history.
    pub fn archive(&mut self, id: &JobId) -> bool {
        match self.active.remove(id) {
            Some(mut tracked) => {
                tracked.cancel_requested = false;
                tracked.not_before = None;
                self.history.insert(id.clone(), tracked);
                true
            }
            None => false,
        }
    }

    /// Move a historical job back into the active map.
    pub fn restore(&mut self, id: &JobId) -> Option<&mut Tracked> {
        let tracked = self.history.remove(id)?;
        self.active.insert(id.clone(), tracked);
        self.active.get_mut(id)
    }

    /// Drop history entries anchored before `cutoff`. Returns how many went.
    pub fn purge_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.history.len();
        self.history
            .retain(|_, t| t.job.retention_anchor() >= cutoff);
        before - self.history.len()
    }

    pub fn jobs_for(&self, requester: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .active
            .values()
            .chain(self.history.values())
            .filter(|t| t.job.requester == requester)
            .map(|t| t.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        jobs
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            history_size: self.history.len(),
            ..QueueStats::default()
        };
        for t in self.active.values().chain(self.history.values()) {
            match t.job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::TimedOut => stats.timed_out += 1,
            }
        }
        stats
    }
}
