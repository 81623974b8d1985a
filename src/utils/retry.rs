//! Retry policy for outbound requests
//!
//! Each attempt reports an explicit [`AttemptOutcome`] instead of throwing, so
//! the policy (how many attempts, how long to wait, when to give up) can be
//! tested without any network.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of one attempt of a retryable operation
#[derive(Debug)]
pub enum AttemptOutcome<T, E> {
    /// Operation produced a usable value
    Done(T),
    /// Transient failure, another attempt may succeed
    Retryable(E),
    /// Permanent failure, do not retry
    Fatal(E),
}

/// Fixed-delay retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given retry budget and fixed delay
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Delay to wait before `attempt` (zero-based), or `None` when the budget is spent
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            Some(Duration::ZERO)
        } else if attempt <= self.max_retries {
            Some(self.delay)
        } else {
            None
        }
    }

    /// Total number of attempts this policy allows
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `operation` under `policy`
///
/// Returns the first `Done` value, the first `Fatal` error, or the last
/// `Retryable` error once every attempt has been spent.
pub async fn run_with_policy<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        let delay = policy.delay_before(attempt).unwrap_or_default();
        if !delay.is_zero() {
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation(attempt).await {
            AttemptOutcome::Done(value) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            AttemptOutcome::Fatal(e) => {
                warn!(error = %e, "Non-retryable error encountered");
                return Err(e);
            }
            AttemptOutcome::Retryable(e) => {
                warn!(
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    error = %e,
                    "Operation failed"
                );
                if attempt >= policy.max_retries {
                    return Err(e);
                }
            }
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(2, Duration::from_millis(500));
        assert_eq!(policy.delay_before(0), Some(Duration::ZERO));
        assert_eq!(policy.delay_before(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_before(2), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_before(3), None);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let result: Result<u32, String> =
            run_with_policy(&fast_policy(3), |_| async { AttemptOutcome::Done(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_success_after_retryable_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<u32, String> = run_with_policy(&fast_policy(3), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    AttemptOutcome::Retryable("flaky".to_string())
                } else {
                    AttemptOutcome::Done(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let result: Result<(), String> = run_with_policy(&fast_policy(2), |attempt| async move {
            AttemptOutcome::Retryable(format!("failure {attempt}"))
        })
        .await;

        assert_eq!(result.unwrap_err(), "failure 2");
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), String> = run_with_policy(&fast_policy(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::Fatal("not found".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
