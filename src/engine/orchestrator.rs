//! Orchestrator: submission, caller-facing queries, and the dispatcher.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast, watch};
use tracing::{debug, info, warn};

use super::queue::{JobBook, QueueStats, Tracked};
use super::retry::RetryPolicy;
use crate::error::{Error, Result};
use crate::event::{EventBus, EventKind, JobEvent};
use crate::model::{DocumentRequest, Job, JobId, JobStatus};
use crate::service::Services;
use crate::telemetry::metrics;

/// Tuning knobs for the orchestrator. Every field has a default, so a TOML
/// file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Hard ceiling on jobs in `running` at once.
    pub max_concurrent: usize,
    pub max_retries: u32,
    /// Backoff per retry attempt; the last entry repeats.
    pub retry_delays_ms: Vec<u64>,
    pub default_timeout_ms: u64,
    /// Timeout for jobs that include a file render.
    pub render_timeout_ms: u64,
    pub history_retention_secs: u64,
    pub sweep_interval_secs: u64,
    /// Buffer of the broadcast notification channel.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_retries: crate::model::DEFAULT_MAX_RETRIES,
            retry_delays_ms: vec![1_000, 3_000, 5_000],
            default_timeout_ms: crate::model::DEFAULT_TIMEOUT_MS,
            render_timeout_ms: crate::model::RENDER_TIMEOUT_MS,
            history_retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
            event_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_delays_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// What `submit` hands back.
#[derive(Debug)]
pub struct Submission {
    pub job_id: JobId,
    pub estimated_duration: Duration,
    /// Observes every published snapshot of this job.
    pub updates: watch::Receiver<Job>,
}

/// The job orchestrator. Cheap to clone; clones share all state.
///
/// Must be used from within a Tokio runtime: dispatching spawns tasks.
pub struct Orchestrator {
    book: Arc<Mutex<JobBook>>,
    pub(crate) services: Services,
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) policy: Arc<RetryPolicy>,
    pub(crate) events: EventBus,
    pub(crate) shutdown: Arc<Notify>,
}

impl Clone for Orchestrator {
    fn clone(&self) -> Self {
        Self {
            book: Arc::clone(&self.book),
            services: self.services.clone(),
            config: Arc::clone(&self.config),
            policy: Arc::clone(&self.policy),
            events: self.events.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Orchestrator {
    pub fn new(services: Services, config: OrchestratorConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        let policy = config.retry_policy();
        Self {
            book: Arc::new(Mutex::new(JobBook::default())),
            services,
            config: Arc::new(config),
            policy: Arc::new(policy),
            events,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Signal background loops to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    pub(crate) fn book(&self) -> MutexGuard<'_, JobBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Caller-facing operations
    // -----------------------------------------------------------------------

    /// Validate and queue a request. A malformed request creates no job.
    pub fn submit(&self, request: DocumentRequest) -> Result<Submission> {
        if let Err(e) = request.validate() {
            metrics::jobs_submitted()
                .add(1, &[opentelemetry::KeyValue::new("result", "invalid")]);
            return Err(Error::Validation(e));
        }

        let mut job = Job::new(request, Utc::now());
        job.max_retries = self.config.max_retries;
        job.timeout_ms = if job.request.deliverables.file_render {
            self.config.render_timeout_ms
        } else {
            self.config.default_timeout_ms
        };
        let job_id = job.id.clone();
        let estimated_duration = job.estimated_duration();
        let priority = job.priority;
        let steps = job.progress.total_steps;

        let updates = {
            let mut book = self.book();
            let tracked = Tracked::new(job);
            let updates = tracked.watch();
            book.insert(tracked);
            self.events.emit(EventKind::Queued {
                id: job_id.clone(),
                priority,
                estimated_duration_ms: estimated_duration.as_millis() as u64,
            });
            updates
        };

        metrics::jobs_submitted().add(1, &[opentelemetry::KeyValue::new("result", "ok")]);
        info!(
            job_id = %job_id,
            %priority,
            steps,
            estimated_ms = estimated_duration.as_millis() as u64,
            "job queued"
        );

        self.dispatch();

        Ok(Submission {
            job_id,
            estimated_duration,
            updates,
        })
    }

    /// Current snapshot of a job, active or archived.
    pub fn get_status(&self, id: &JobId) -> Result<Job> {
        self.book()
            .find(id)
            .map(|t| t.job.clone())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Watch a known job's snapshots.
    pub fn watch(&self, id: &JobId) -> Option<watch::Receiver<Job>> {
        self.book().find(id).map(Tracked::watch)
    }

    /// Subscribe to every job notification.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// All jobs owned by `requester`, newest first.
    pub fn list_jobs(&self, requester: &str) -> Vec<Job> {
        self.book().jobs_for(requester)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.book().stats()
    }

    /// Cancel a pending or running job owned by `requester`.
    ///
    /// A pending job fails immediately. A running job is flagged and fails at
    /// its next state check; an in-flight collaborator call is left to finish.
    pub fn cancel(&self, id: &JobId, requester: &str) -> bool {
        let mut book = self.book();
        let Some(tracked) = book.active_mut(id) else {
            return false;
        };
        if tracked.job.requester != requester {
            warn!(job_id = %id, requester, "cancel refused: not the job owner");
            return false;
        }
        let status = tracked.job.status;
        match status {
            JobStatus::Pending => {
                self.finalize_cancelled(&mut book, id);
                true
            }
            JobStatus::Running => {
                tracked.cancel_requested = true;
                info!(job_id = %id, "cancellation requested for running job");
                true
            }
            _ => false,
        }
    }

    /// Re-queue a failed or timed-out job owned by `requester`.
    ///
    /// Refused for cancelled jobs and for jobs that have used every retry.
    pub fn retry(&self, id: &JobId, requester: &str) -> bool {
        let retry_count = {
            let mut book = self.book();
            let eligible = book.find(id).is_some_and(|t| {
                t.job.requester == requester
                    && matches!(t.job.status, JobStatus::Failed | JobStatus::TimedOut)
                    && !t.job.was_cancelled()
                    && t.job.retry_count < t.job.max_retries
            });
            if !eligible || !book.in_history(id) {
                return false;
            }
            let Some(tracked) = book.restore(id) else {
                return false;
            };
            let from = tracked.job.status;
            if let Err(e) = tracked.job.requeue() {
                warn!(job_id = %id, "cannot retry job: {e}");
                return false;
            }
            tracked.not_before = None;
            tracked.cancel_requested = false;
            tracked.publish();
            metrics::record_transition(&from.to_string(), "pending");
            tracked.job.retry_count
        };

        info!(job_id = %id, retry_count, "job retried by caller");
        self.events.emit(EventKind::Retried {
            id: id.clone(),
            retry_count,
            delay_ms: 0,
        });
        self.dispatch();
        true
    }

    // -----------------------------------------------------------------------
    // Dispatcher
    // -----------------------------------------------------------------------

    /// Admit pending jobs while capacity allows.
    ///
    /// Selection is highest priority first, then earliest submission. Runs
    /// after every submission, completion, failure, timeout and retry.
    pub(crate) fn dispatch(&self) {
        let now = tokio::time::Instant::now();
        let mut admitted = Vec::new();
        {
            let mut book = self.book();
            while book.running() < self.config.max_concurrent {
                let Some(id) = book.next_eligible(now) else {
                    break;
                };
                let Some(tracked) = book.active_mut(&id) else {
                    break;
                };
                if let Err(e) = tracked.job.start(Utc::now()) {
                    warn!(job_id = %id, "cannot start job: {e}");
                    break;
                }
                tracked.not_before = None;
                tracked.publish();
                let attempt = tracked.job.retry_count + 1;
                let limit = tracked.job.timeout();
                self.events.emit(EventKind::Started {
                    id: id.clone(),
                    attempt,
                });
                admitted.push((id, attempt, limit));
            }
        }

        for (id, attempt, limit) in admitted {
            metrics::record_transition("pending", "running");
            debug!(job_id = %id, attempt, timeout_ms = limit.as_millis() as u64, "job dispatched");
            tokio::spawn(self.clone().drive(id, attempt, limit));
        }
    }

    /// Re-run the dispatcher once `delay` has elapsed.
    pub(crate) fn dispatch_after(&self, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.dispatch();
        });
    }

    /// Fail a pending or running job as cancelled and archive it.
    pub(crate) fn finalize_cancelled(&self, book: &mut JobBook, id: &JobId) {
        let Some(tracked) = book.active_mut(id) else {
            return;
        };
        let from = tracked.job.status;
        if let Err(e) = tracked.job.finish_cancelled(Utc::now()) {
            warn!(job_id = %id, "cannot cancel job: {e}");
            return;
        }
        tracked.publish();
        book.archive(id);

        metrics::record_transition(&from.to_string(), "failed");
        info!(job_id = %id, %from, "job cancelled");
        self.events.emit(EventKind::Cancelled { id: id.clone() });
    }
}
