//! Retry/failure policy: transient vs fatal classification and backoff.

use std::time::Duration;

use crate::model::Job;

/// Substrings (lowercase) that mark a step error as transient.
pub const RETRYABLE_PATTERNS: [&str; 6] = [
    "timeout",
    "network",
    "connection",
    "rate limit",
    "service unavailable",
    "internal server error",
];

/// Case-insensitive substring match against [`RETRYABLE_PATTERNS`].
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// What to do with a job whose step just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Re-queue the whole job after `delay`.
    Retry { delay: Duration },
    /// Finalize as failed.
    Fail { retryable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before retry number `attempt + 1`. The last entry repeats.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.delays.len().saturating_sub(1));
        self.delays.get(idx).copied().unwrap_or_default()
    }

    pub fn decide(&self, job: &Job, message: &str) -> Decision {
        let retryable = is_retryable(message);
        if retryable && job.retry_count < job.max_retries {
            Decision::Retry {
                delay: self.delay_for(job.retry_count),
            }
        } else {
            Decision::Fail { retryable }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::request::tests::valid_request;

    #[test]
    fn classifies_transient_errors() {
        assert!(is_retryable("Rate limit exceeded"));
        assert!(is_retryable("upstream returned 503 Service Unavailable"));
        assert!(is_retryable("Connection reset by peer"));
        assert!(is_retryable("request TIMEOUT after 30s"));
        assert!(is_retryable("500 Internal Server Error"));
        assert!(!is_retryable("invalid template"));
        assert!(!is_retryable("missing field `memo`"));
    }

    #[test]
    fn delays_progress_then_plateau() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(3));
        assert_eq!(policy.delay_for(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for(7), Duration::from_secs(5));
    }

    #[test]
    fn empty_table_means_no_delay() {
        assert_eq!(RetryPolicy::new(Vec::new()).delay_for(2), Duration::ZERO);
    }

    #[test]
    fn exhausted_retries_fail() {
        let policy = RetryPolicy::default();
        let mut job = Job::new(valid_request(), chrono::Utc::now());

        assert_eq!(
            policy.decide(&job, "network unreachable"),
            Decision::Retry {
                delay: Duration::from_secs(1)
            }
        );

        job.retry_count = job.max_retries;
        assert_eq!(
            policy.decide(&job, "network unreachable"),
            Decision::Fail { retryable: true }
        );
        assert_eq!(
            policy.decide(&job, "invalid template"),
            Decision::Fail { retryable: false }
        );
    }
}
