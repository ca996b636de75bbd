//! Job attempt spans.

use tracing::Span;

use crate::model::JobId;

/// Span wrapping one attempt of a job, from dispatch to settlement.
pub fn start_job_span(job_id: &JobId, attempt: u32) -> Span {
    tracing::info_span!(
        "job.attempt",
        "job.id" = %job_id,
        "job.attempt" = attempt,
        "job.state" = tracing::field::Empty,
    )
}

/// Log a state transition inside `span` and remember the new state on it.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
