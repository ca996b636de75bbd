//! Core data model.
//!
//! A job is one request to produce a multi-part deliverable. It has identity
//! (requester + label + submission time), priority, a per-step record of the
//! three sub-tasks, aggregate progress, and an append-only error log.

pub mod request;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::service::{ComplianceReport, RenderedFile};

pub use request::{
    CompanyContext, Deliverables, DocumentRequest, ExpenseContext, GenerationOptions,
    ProjectContext, Templates,
};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Derive an id from who asked, what they called it, and when.
    ///
    /// A short random suffix keeps ids unique when the same requester
    /// submits the same label within one millisecond.
    pub fn derive(requester: &str, label: &str, submitted_at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_{}_{}_{}",
            slug(requester),
            slug(label),
            submitted_at.timestamp_millis(),
            &suffix[..6]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let out = out.trim_matches('-');
    if out.is_empty() {
        "job".to_string()
    } else {
        out.chars().take(32).collect()
    }
}

// ---------------------------------------------------------------------------
// Status & priority
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a dispatcher slot.
    Pending,
    /// Steps executing.
    Running,
    /// All requested steps succeeded. Terminal.
    Completed,
    /// A step failed (or the caller cancelled). Terminal unless retried.
    Failed,
    /// Deadline exceeded. Terminal unless explicitly retried.
    TimedOut,
}

impl JobStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Failed)     // cancelled before dispatch
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Failed, Pending)     // retry
                | (TimedOut, Pending) // explicit retry
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Admission priority. Orders the pending queue only; never preempts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(Error::Other(format!("unknown priority: {other}"))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// The three sub-tasks, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Narrative,
    ComplianceMemo,
    FileRender,
}

impl StepKind {
    pub const ORDER: [StepKind; 3] = [
        StepKind::Narrative,
        StepKind::ComplianceMemo,
        StepKind::FileRender,
    ];

    /// Fixed duration estimate used for the submission-time ETA.
    pub fn estimate(self) -> Duration {
        match self {
            StepKind::Narrative => Duration::from_secs(30),
            StepKind::ComplianceMemo => Duration::from_secs(45),
            StepKind::FileRender => Duration::from_secs(60),
        }
    }

    /// Human label shown as the current step while it runs.
    pub fn activity(self) -> &'static str {
        match self {
            StepKind::Narrative => "Generating narrative",
            StepKind::ComplianceMemo => "Analyzing compliance",
            StepKind::FileRender => "Rendering file",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepKind::Narrative => "narrative",
            StepKind::ComplianceMemo => "compliance_memo",
            StepKind::FileRender => "file_render",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// State of one sub-task within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState<T> {
    pub status: StepStatus,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> Default for StepState<T> {
    fn default() -> Self {
        Self {
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }
}

impl<T> StepState<T> {
    fn fail(&mut self, message: &str) {
        self.status = StepStatus::Failed;
        self.error = Some(message.to_string());
    }
}

/// Fixed-shape record with one entry per sub-task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Steps {
    pub narrative: StepState<String>,
    pub compliance_memo: StepState<ComplianceReport>,
    pub file_render: StepState<RenderedFile>,
}

impl Steps {
    pub fn status(&self, kind: StepKind) -> StepStatus {
        match kind {
            StepKind::Narrative => self.narrative.status,
            StepKind::ComplianceMemo => self.compliance_memo.status,
            StepKind::FileRender => self.file_render.status,
        }
    }

    pub fn error(&self, kind: StepKind) -> Option<&str> {
        match kind {
            StepKind::Narrative => self.narrative.error.as_deref(),
            StepKind::ComplianceMemo => self.compliance_memo.error.as_deref(),
            StepKind::FileRender => self.file_render.error.as_deref(),
        }
    }

    fn set_status(&mut self, kind: StepKind, status: StepStatus) {
        match kind {
            StepKind::Narrative => self.narrative.status = status,
            StepKind::ComplianceMemo => self.compliance_memo.status = status,
            StepKind::FileRender => self.file_render.status = status,
        }
    }

    fn fail(&mut self, kind: StepKind, message: &str) {
        match kind {
            StepKind::Narrative => self.narrative.fail(message),
            StepKind::ComplianceMemo => self.compliance_memo.fail(message),
            StepKind::FileRender => self.file_render.fail(message),
        }
    }

    fn running(&self) -> Option<StepKind> {
        StepKind::ORDER
            .into_iter()
            .find(|k| self.status(*k) == StepStatus::Running)
    }
}

/// Output of one successful sub-task.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Narrative(String),
    ComplianceMemo(ComplianceReport),
    FileRender(RenderedFile),
}

impl StepOutput {
    pub fn kind(&self) -> StepKind {
        match self {
            StepOutput::Narrative(_) => StepKind::Narrative,
            StepOutput::ComplianceMemo(_) => StepKind::ComplianceMemo,
            StepOutput::FileRender(_) => StepKind::FileRender,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// What the job is doing right now.
    pub current_step: String,
    pub completed_steps: Vec<StepKind>,
    pub total_steps: u32,
    /// Always `round(100 * completed / total)`.
    pub percentage: u8,
}

impl Progress {
    pub fn new(total_steps: u32) -> Self {
        Self {
            current_step: "Queued".to_string(),
            completed_steps: Vec::new(),
            total_steps,
            percentage: 0,
        }
    }

    fn mark_completed(&mut self, step: StepKind) {
        if !self.completed_steps.contains(&step) {
            self.completed_steps.push(step);
        }
        self.percentage = percentage(self.completed_steps.len() as u32, self.total_steps);
    }
}

fn percentage(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    (100.0 * f64::from(done) / f64::from(total)).round() as u8
}

// ---------------------------------------------------------------------------
// Errors & results
// ---------------------------------------------------------------------------

/// Where a recorded error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Step(StepKind),
    Timeout,
    Cancelled,
}

impl std::fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorSource::Step(kind) => write!(f, "{kind}"),
            ErrorSource::Timeout => write!(f, "timeout"),
            ErrorSource::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One entry of the append-only error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub source: ErrorSource,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// `retry_count` at the moment the error was recorded.
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub document_count: u32,
    pub elapsed_ms: u64,
    pub compliance_score: Option<f64>,
    /// Flat 10% of total expenses. Display estimate only.
    pub estimated_credit: Option<f64>,
}

/// Aggregated output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub narrative: Option<String>,
    pub compliance_report: Option<ComplianceReport>,
    pub file: Option<RenderedFile>,
    pub summary: JobSummary,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 5 * 60 * 1000;
pub const RENDER_TIMEOUT_MS: u64 = 10 * 60 * 1000;
pub const MIN_ESTIMATE: Duration = Duration::from_secs(30);

pub const CANCELLED_MESSAGE: &str = "cancelled by caller";

/// A document-generation job tracked by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub requester: String,
    /// Human label, taken from the project name.
    pub label: String,
    pub status: JobStatus,
    pub priority: Priority,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    pub progress: Progress,
    pub steps: Steps,
    pub request: DocumentRequest,
    pub result: Option<JobResult>,
    pub errors: Vec<ErrorEntry>,

    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl Job {
    /// Build a pending job for an already-validated request.
    pub fn new(request: DocumentRequest, submitted_at: DateTime<Utc>) -> Self {
        let label = request.project.name.trim().to_string();
        let id = JobId::derive(&request.requester, &label, submitted_at);
        let timeout_ms = if request.deliverables.file_render {
            RENDER_TIMEOUT_MS
        } else {
            DEFAULT_TIMEOUT_MS
        };
        Self {
            id,
            requester: request.requester.clone(),
            label,
            status: JobStatus::Pending,
            priority: request.priority,
            submitted_at,
            started_at: None,
            finished_at: None,
            progress: Progress::new(request.deliverables.count()),
            steps: Steps::default(),
            result: None,
            errors: Vec::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms,
            request,
        }
    }

    /// Requested steps, in execution order.
    pub fn planned_steps(&self) -> Vec<StepKind> {
        self.request.deliverables.steps()
    }

    /// Sum of per-step estimates, never below 30 seconds.
    pub fn estimated_duration(&self) -> Duration {
        let total: Duration = self.planned_steps().into_iter().map(StepKind::estimate).sum();
        total.max(MIN_ESTIMATE)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether the most recent failure was a caller cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.errors
            .last()
            .is_some_and(|e| e.source == ErrorSource::Cancelled)
    }

    pub(crate) fn transition(&mut self, to: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Promote to running. `started_at` is recorded only on the first start.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Running)?;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.progress.current_step = "Starting".to_string();
        Ok(())
    }

    pub(crate) fn begin_step(&mut self, step: StepKind) {
        self.steps.set_status(step, StepStatus::Running);
        self.progress.current_step = step.activity().to_string();
    }

    pub(crate) fn complete_step(&mut self, output: StepOutput) {
        let kind = output.kind();
        match output {
            StepOutput::Narrative(text) => {
                self.steps.narrative.status = StepStatus::Completed;
                self.steps.narrative.result = Some(text);
            }
            StepOutput::ComplianceMemo(report) => {
                self.steps.compliance_memo.status = StepStatus::Completed;
                self.steps.compliance_memo.result = Some(report);
            }
            StepOutput::FileRender(file) => {
                self.steps.file_render.status = StepStatus::Completed;
                self.steps.file_render.result = Some(file);
            }
        }
        self.progress.mark_completed(kind);
    }

    /// Record a failed step: its own error plus an audit-log entry.
    pub(crate) fn fail_step(&mut self, step: StepKind, message: &str, now: DateTime<Utc>) {
        self.steps.fail(step, message);
        self.record_error(ErrorSource::Step(step), message, now);
    }

    pub(crate) fn record_error(&mut self, source: ErrorSource, message: &str, now: DateTime<Utc>) {
        self.errors.push(ErrorEntry {
            source,
            message: message.to_string(),
            timestamp: now,
            retry_count: self.retry_count,
        });
    }

    /// Reset steps and progress and go back to pending for another attempt.
    pub(crate) fn requeue(&mut self) -> Result<()> {
        self.transition(JobStatus::Pending)?;
        self.retry_count += 1;
        self.steps = Steps::default();
        self.progress = Progress::new(self.progress.total_steps);
        self.result = None;
        self.finished_at = None;
        Ok(())
    }

    /// Mark as completed and compute the summary from step outputs.
    pub(crate) fn finish_completed(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.finished_at = Some(now);
        self.progress.current_step = "Completed".to_string();

        let document_count = self
            .planned_steps()
            .into_iter()
            .filter(|k| self.steps.status(*k) == StepStatus::Completed)
            .count() as u32;
        let compliance_score = self
            .steps
            .compliance_memo
            .result
            .as_ref()
            .and_then(|r| r.score);
        let elapsed_ms = self
            .started_at
            .map(|s| (now - s).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        self.result = Some(JobResult {
            narrative: self.steps.narrative.result.clone(),
            compliance_report: self.steps.compliance_memo.result.clone(),
            file: self.steps.file_render.result.clone(),
            summary: JobSummary {
                document_count,
                elapsed_ms,
                compliance_score,
                estimated_credit: Some(self.request.expenses.total() * 0.10),
            },
        });
        Ok(())
    }

    pub(crate) fn finish_failed(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(now);
        self.progress.current_step = "Failed".to_string();
        Ok(())
    }

    /// Force the timed-out state, failing whatever step was in flight.
    pub(crate) fn finish_timed_out(&mut self, now: DateTime<Utc>) -> Result<()> {
        let message = format!("job exceeded timeout of {}ms", self.timeout_ms);
        if let Some(step) = self.steps.running() {
            self.steps.fail(step, &message);
        }
        self.record_error(ErrorSource::Timeout, &message, now);
        self.transition(JobStatus::TimedOut)?;
        self.finished_at = Some(now);
        self.progress.current_step = "Timed out".to_string();
        Ok(())
    }

    /// Fail as cancelled. A step still marked running is failed with it.
    pub(crate) fn finish_cancelled(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let Some(step) = self.steps.running() {
            self.steps.fail(step, CANCELLED_MESSAGE);
        }
        self.record_error(ErrorSource::Cancelled, CANCELLED_MESSAGE, now);
        self.finish_failed(now)
    }

    /// Reference instant for history retention.
    pub fn retention_anchor(&self) -> DateTime<Utc> {
        self.finished_at.unwrap_or(self.submitted_at)
    }
}
