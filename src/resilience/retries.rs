//! Retry logic.
//!
//! # Responsibilities
//! - Classify failures as transient or permanent
//! - Execute an async operation with exponential backoff between attempts
//! - Wrap the final error with the operation name and attempt count
//!
//! # Design Decisions
//! - Only store reads and read-modify-write sequences are retried
//! - The outbound scraper trigger is never retried: a second POST would
//!   start a second scrape run
//! - The default predicate caps total tries at [`RETRY_HARD_CAP`] whatever
//!   the configured attempt limit

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Upper bound on total tries when using the default predicate.
pub const RETRY_HARD_CAP: u32 = 3;

/// Message fragments that mark an otherwise unclassified error as transient.
const TRANSIENT_MESSAGE_MARKERS: [&str; 2] = ["Network error", "Request timeout"];

/// Errors that know whether retrying them can help.
pub trait Retryable {
    /// True for conditions expected to clear on their own (503, resets,
    /// timeouts, DNS failures, refused connections).
    fn is_transient(&self) -> bool;
}

/// Returns true when an error message carries one of the transient markers.
pub fn is_transient_message(message: &str) -> bool {
    TRANSIENT_MESSAGE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Default retry predicate.
pub fn default_should_retry<E: Retryable>(err: &E, attempt: u32) -> bool {
    err.is_transient() && attempt < RETRY_HARD_CAP
}

/// Backoff parameters for [`retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            self.multiplier,
            self.jitter,
        )
    }
}

/// The last error of a retried operation, with context.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E> {
    pub operation: &'static str,
    pub attempts: u32,
    #[source]
    pub source: E,
}

impl<E> RetryError<E> {
    /// The underlying error of the final attempt.
    pub fn inner(&self) -> &E {
        &self.source
    }

    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Run `op` under `policy`, retrying errors accepted by [`default_should_retry`].
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    retry_if(policy, operation, default_should_retry::<E>, op).await
}

/// Run `op` under `policy` with a custom predicate.
///
/// `should_retry` receives the error and the number of the attempt that just
/// failed. The configured attempt limit always applies on top of it.
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &'static str,
    should_retry: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E, u32) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        tracing::debug!(operation, attempt, max_attempts, "Attempting operation");

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(operation, attempt, error = %e, "Operation attempt failed");

                if attempt >= max_attempts || !should_retry(&e, attempt) {
                    if attempt > 1 {
                        tracing::error!(operation, attempts = attempt, error = %e, "All retry attempts failed");
                    }
                    return Err(RetryError {
                        operation,
                        attempts: attempt,
                        source: e,
                    });
                }

                let delay = policy.delay_before(attempt + 1);
                tracing::info!(operation, attempt, delay = ?delay, "Retrying operation");
                metrics::record_store_retry(operation);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient: {})", self.transient)
        }
    }

    impl std::error::Error for TestError {}

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry(&RetryPolicy::default(), "flaky_read", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestError { transient: true })
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = retry(&RetryPolicy::default(), "bad_read", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: false })
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.inner().transient);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = retry(&RetryPolicy::default(), "down_read", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: true })
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("down_read failed after 3 attempt(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_cap_applies_over_larger_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 10,
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = retry(&policy, "capped_read", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: true })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_HARD_CAP);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_follow_schedule() {
        let start = tokio::time::Instant::now();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let _: Result<(), _> = retry(&RetryPolicy::default(), "timed_read", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: true })
            }
        })
        .await;

        // 1000ms before attempt 2, 2000ms before attempt 3.
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };

        let result: Result<(), _> = retry_if(&policy, "custom", |_: &TestError, _| true, || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(TestError { transient: false })
            }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_transient_message_markers() {
        assert!(is_transient_message("Network error: socket hang up"));
        assert!(is_transient_message("Request timeout after 5000ms"));
        assert!(!is_transient_message("Resource not found"));
    }
}
