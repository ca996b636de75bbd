//! Metric instruments, created from the global `"docq"` meter.
//!
//! Without a registered `MeterProvider` these are no-ops.

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("docq")
}

/// Counter: submissions. Labels: `result` ("ok" | "invalid").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("docq.jobs.submitted")
        .with_description("Number of document jobs submitted")
        .build()
}

/// Counter: job state transitions. Labels: `from`, `to`.
pub fn job_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("docq.jobs.state_transitions")
        .with_description("Number of job state transitions")
        .build()
}

/// Counter: automatic retries scheduled after a transient step failure.
pub fn retries_scheduled() -> Counter<u64> {
    meter()
        .u64_counter("docq.jobs.retries")
        .with_description("Automatic retries scheduled")
        .build()
}

/// Histogram: collaborator call duration. Labels: `step`.
pub fn step_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("docq.step.duration_ms")
        .with_description("Step execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

pub fn record_transition(from: &str, to: &str) {
    job_state_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}
