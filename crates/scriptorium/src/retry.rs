//! Linear-backoff retry for provider calls that signal throttling.
//!
//! Only errors classified as transient (HTTP 429/503) are retried. Once the
//! attempt budget is spent the last error is reclassified as a plain
//! upstream failure so callers never see a `Transient` escape.

use std::future::Future;
use std::time::Duration;

use crate::error::{LlmError, OcrError};

/// Retry budget for one provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff_base * n`.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// An error that can tell whether retrying might help.
pub trait Retryable: Sized {
    fn is_transient(&self) -> bool;

    /// Converts an exhausted transient error into an upstream failure.
    fn into_upstream(self) -> Self;
}

/// True for the HTTP statuses providers use to signal throttling.
pub fn is_transient_status(status: u16) -> bool {
    status == 429 || status == 503
}

impl Retryable for OcrError {
    fn is_transient(&self) -> bool {
        matches!(self, OcrError::Transient { .. })
    }

    fn into_upstream(self) -> Self {
        match self {
            OcrError::Transient { status, body } => OcrError::Api { status, body },
            other => other,
        }
    }
}

impl Retryable for LlmError {
    fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient { .. })
    }

    fn into_upstream(self) -> Self {
        match self {
            LlmError::Transient { status, body } => LlmError::Api { status, body },
            other => other,
        }
    }
}

/// Runs `op` until it succeeds, fails non-transiently, or the budget runs out.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let backoff = policy.backoff_base * attempt;
                tracing::warn!(
                    "{}: attempt {}/{} throttled ({}), retrying in {:?}",
                    what,
                    attempt,
                    max_attempts,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                tracing::warn!("{}: giving up after {} attempts", what, attempt);
                return Err(e.into_upstream());
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn throttled() -> LlmError {
        LlmError::Transient {
            status: 429,
            body: "slow down".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, LlmError> = with_retry(RetryPolicy::default(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(throttled())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_transient_becomes_upstream() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = with_retry(RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(throttled()) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Api { status: 429, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), OcrError> = with_retry(RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(OcrError::Api {
                    status: 400,
                    body: "bad".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear() {
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
        };
        let _: Result<(), LlmError> = with_retry(policy, "test", || async { Err(throttled()) }).await;
        // 100ms after the first attempt, 200ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(429));
        assert!(is_transient_status(503));
        assert!(!is_transient_status(500));
        assert!(!is_transient_status(404));
    }
}
