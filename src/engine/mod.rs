//! Job engine: queue, dispatcher, step runner, retry policy, timeout guard,
//! and history retention.

pub mod history;
pub mod orchestrator;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod timeout;

pub use orchestrator::{Orchestrator, OrchestratorConfig, Submission};
pub use queue::QueueStats;
pub use retry::{Decision, RetryPolicy, is_retryable};
