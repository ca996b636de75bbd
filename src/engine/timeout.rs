//! Timeout guard: a per-attempt deadline that force-fails overrunning jobs.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use super::Orchestrator;
use crate::event::EventKind;
use crate::model::{JobId, JobStatus};
use crate::telemetry::job::record_state_transition;
use crate::telemetry::metrics;

/// Outcome of racing an attempt against its deadline.
pub(crate) enum Guarded<T> {
    Finished(T),
    Expired,
}

/// Run `attempt` until it finishes or `limit` elapses.
///
/// The deadline is armed when called (the job has just entered `running`) and
/// disarmed by returning. On expiry the attempt future is dropped, so an
/// in-flight collaborator answer is never observed.
pub(crate) async fn guard<F: Future>(limit: Duration, attempt: F) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        out = attempt => Guarded::Finished(out),
        _ = tokio::time::sleep(limit) => Guarded::Expired,
    }
}

impl Orchestrator {
    /// Finalize a running job as timed out and archive it. A job the caller
    /// already cancelled ends as cancelled instead.
    pub(crate) fn expire(&self, id: &JobId) {
        let mut book = self.book();
        let Some(tracked) = book.active_mut(id) else {
            return;
        };
        if tracked.job.status != JobStatus::Running {
            return;
        }
        if tracked.cancel_requested {
            record_state_transition(&tracing::Span::current(), "running", "failed");
            self.finalize_cancelled(&mut book, id);
            return;
        }
        let timeout_ms = tracked.job.timeout_ms;
        if let Err(e) = tracked.job.finish_timed_out(Utc::now()) {
            warn!(job_id = %id, "cannot time out job: {e}");
            return;
        }
        tracked.publish();
        book.archive(id);

        record_state_transition(&tracing::Span::current(), "running", "timed_out");
        warn!(job_id = %id, timeout_ms, "job timed out");
        metrics::record_transition("running", "timed_out");
        self.events.emit(EventKind::TimedOut {
            id: id.clone(),
            timeout_ms,
        });
    }
}
