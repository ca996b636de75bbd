//! Step runner: executes one job attempt's sub-tasks strictly in order.
//!
//! The runner never holds the job lock across a collaborator call. Every
//! state check (cancellation, job still running) happens between calls.

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{Instrument, debug, error, info, warn};

use super::Orchestrator;
use super::queue::JobBook;
use super::retry::Decision;
use super::timeout::{Guarded, guard};
use crate::event::EventKind;
use crate::model::{DocumentRequest, JobId, JobStatus, StepKind, StepOutput};
use crate::service::{RenderData, RenderOptions, RenderStatus};
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

/// How an attempt ended, before the policy decides what that means.
enum RunOutcome {
    Completed,
    StepFailed { step: StepKind, error: String },
    Cancelled,
    /// The job left `running` underneath us. Nothing to settle.
    Superseded,
}

/// Outputs of earlier steps, fed into later ones.
#[derive(Default)]
struct Artifacts {
    narrative: Option<String>,
    compliance_report: Option<String>,
}

impl Orchestrator {
    /// Drive one attempt of a job that the dispatcher has just promoted.
    pub(crate) async fn drive(self, id: JobId, attempt: u32, limit: Duration) {
        let span = start_job_span(&id, attempt);
        async {
            match guard(limit, self.run_steps(&id)).await {
                Guarded::Finished(outcome) => self.settle(&id, outcome),
                Guarded::Expired => self.expire(&id),
            }
        }
        .instrument(span)
        .await;

        // Capacity may have freed up.
        self.dispatch();
    }

    async fn run_steps(&self, id: &JobId) -> RunOutcome {
        let (request, steps) = {
            let book = self.book();
            match book.find(id) {
                Some(t) if t.job.status == JobStatus::Running => {
                    (t.job.request.clone(), t.job.planned_steps())
                }
                _ => return RunOutcome::Superseded,
            }
        };

        let mut artifacts = Artifacts::default();
        let last = steps.len().saturating_sub(1);

        for (i, step) in steps.into_iter().enumerate() {
            if let Some(stop) = self.begin_step(id, step) {
                return stop;
            }

            let started = Instant::now();
            let result = self.execute(step, &request, &artifacts).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics::step_duration_ms().record(
                elapsed_ms,
                &[opentelemetry::KeyValue::new("step", step.to_string())],
            );

            let output = match result {
                Ok(output) => output,
                Err(error) => {
                    warn!(job_id = %id, %step, %error, "step failed");
                    return RunOutcome::StepFailed { step, error };
                }
            };
            info!(job_id = %id, %step, duration_ms = elapsed_ms as u64, "step completed");

            match &output {
                StepOutput::Narrative(text) => artifacts.narrative = Some(text.clone()),
                StepOutput::ComplianceMemo(report) => {
                    artifacts.compliance_report = match serde_json::to_string(report) {
                        Ok(json) => Some(json),
                        Err(e) => {
                            return RunOutcome::StepFailed {
                                step,
                                error: format!("cannot serialize compliance report: {e}"),
                            };
                        }
                    }
                }
                StepOutput::FileRender(_) => {}
            }

            if let Some(stop) = self.finish_step(id, output, i == last) {
                return stop;
            }
        }

        // No steps were planned; the loop above completes jobs that had any.
        let mut book = self.book();
        self.complete(&mut book, id);
        RunOutcome::Completed
    }

    /// Mark `step` running. Returns `Some` when the attempt must stop instead.
    fn begin_step(&self, id: &JobId, step: StepKind) -> Option<RunOutcome> {
        let mut book = self.book();
        let tracked = match book.active_mut(id) {
            Some(t) if t.job.status == JobStatus::Running => t,
            _ => return Some(RunOutcome::Superseded),
        };
        if tracked.cancel_requested {
            return Some(RunOutcome::Cancelled);
        }
        tracked.job.begin_step(step);
        tracked.publish();
        debug!(job_id = %id, %step, "step started");
        self.events.emit(EventKind::Progress {
            id: id.clone(),
            step,
            percentage: tracked.job.progress.percentage,
            message: step.activity().to_string(),
        });
        None
    }

    /// Record a step's output. The last step completes the job in the same
    /// critical section, so nobody observes 100% on a running job.
    fn finish_step(&self, id: &JobId, output: StepOutput, last: bool) -> Option<RunOutcome> {
        let step = output.kind();
        let mut book = self.book();
        let tracked = match book.active_mut(id) {
            Some(t) if t.job.status == JobStatus::Running => t,
            _ => return Some(RunOutcome::Superseded),
        };
        if tracked.cancel_requested {
            // Keep the in-flight output, except the last one: 100% means completed.
            if !last {
                tracked.job.complete_step(output);
            }
            return Some(RunOutcome::Cancelled);
        }
        tracked.job.complete_step(output);

        if last {
            self.complete(&mut book, id);
            return Some(RunOutcome::Completed);
        }

        tracked.publish();
        self.events.emit(EventKind::Progress {
            id: id.clone(),
            step,
            percentage: tracked.job.progress.percentage,
            message: format!("{step} completed"),
        });
        None
    }

    /// Call the collaborator for one step.
    async fn execute(
        &self,
        step: StepKind,
        request: &DocumentRequest,
        artifacts: &Artifacts,
    ) -> Result<StepOutput, String> {
        match step {
            StepKind::Narrative => self
                .services
                .narrative
                .generate(
                    &request.templates.narrative,
                    &request.company,
                    &request.project,
                    &request.options,
                )
                .await
                .map(StepOutput::Narrative)
                .map_err(|e| e.to_string()),
            StepKind::ComplianceMemo => self
                .services
                .compliance
                .generate(
                    &request.company,
                    &request.project,
                    &request.expenses,
                    &request.options,
                )
                .await
                .map(StepOutput::ComplianceMemo)
                .map_err(|e| e.to_string()),
            StepKind::FileRender => {
                let data = RenderData {
                    company: request.company.clone(),
                    project: request.project.clone(),
                    expenses: request.expenses.clone(),
                    total_expenses: request.expenses.total(),
                    narrative: artifacts.narrative.clone(),
                    compliance_report: artifacts.compliance_report.clone(),
                };
                let file = self
                    .services
                    .renderer
                    .render(&request.templates.render, &data, &RenderOptions::default())
                    .await
                    .map_err(|e| e.to_string())?;
                if file.status == RenderStatus::Failed {
                    return Err(format!("file render {} reported failure", file.id));
                }
                Ok(StepOutput::FileRender(file))
            }
        }
    }

    /// Apply the outcome of an attempt that finished before its deadline.
    fn settle(&self, id: &JobId, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Completed | RunOutcome::Superseded => {}
            RunOutcome::Cancelled => {
                let mut book = self.book();
                self.finalize_cancelled(&mut book, id);
            }
            RunOutcome::StepFailed { step, error } => self.step_failed(id, step, &error),
        }
    }

    fn complete(&self, book: &mut JobBook, id: &JobId) {
        let Some(tracked) = book.active_mut(id) else {
            return;
        };
        if let Err(e) = tracked.job.finish_completed(Utc::now()) {
            error!(job_id = %id, "cannot complete job: {e}");
            return;
        }
        tracked.publish();
        let (duration_ms, document_count) = tracked
            .job
            .result
            .as_ref()
            .map(|r| (r.summary.elapsed_ms, r.summary.document_count))
            .unwrap_or_default();
        book.archive(id);

        record_state_transition(&tracing::Span::current(), "running", "completed");
        metrics::record_transition("running", "completed");
        info!(job_id = %id, duration_ms, document_count, "job completed");
        self.events.emit(EventKind::Completed {
            id: id.clone(),
            duration_ms,
            document_count,
        });
    }

    /// Record the failure, then retry or finalize per policy.
    fn step_failed(&self, id: &JobId, step: StepKind, error: &str) {
        let mut book = self.book();
        let Some(tracked) = book.active_mut(id) else {
            return;
        };
        if tracked.job.status != JobStatus::Running {
            return;
        }
        tracked.job.fail_step(step, error, Utc::now());

        if tracked.cancel_requested {
            self.finalize_cancelled(&mut book, id);
            return;
        }

        match self.policy.decide(&tracked.job, error) {
            Decision::Retry { delay } => {
                let requeued = tracked
                    .job
                    .transition(JobStatus::Failed)
                    .and_then(|()| tracked.job.requeue());
                if let Err(e) = requeued {
                    error!(job_id = %id, "cannot requeue job: {e}");
                    return;
                }
                tracked.not_before = Some(tokio::time::Instant::now() + delay);
                tracked.publish();
                let retry_count = tracked.job.retry_count;
                drop(book);

                record_state_transition(&tracing::Span::current(), "running", "pending");
                metrics::record_transition("running", "pending");
                metrics::retries_scheduled().add(1, &[]);
                info!(
                    job_id = %id,
                    %step,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "retryable step failure, job re-queued"
                );
                self.events.emit(EventKind::Retried {
                    id: id.clone(),
                    retry_count,
                    delay_ms: delay.as_millis() as u64,
                });
                self.dispatch_after(delay);
            }
            Decision::Fail { retryable } => {
                if let Err(e) = tracked.job.finish_failed(Utc::now()) {
                    error!(job_id = %id, "cannot fail job: {e}");
                    return;
                }
                tracked.publish();
                let retry_count = tracked.job.retry_count;
                book.archive(id);

                record_state_transition(&tracing::Span::current(), "running", "failed");
                metrics::record_transition("running", "failed");
                error!(job_id = %id, %step, retryable, retry_count, %error, "job failed");
                self.events.emit(EventKind::Failed {
                    id: id.clone(),
                    error: format!("{step}: {error}"),
                    retry_count,
                });
            }
        }
    }
}
