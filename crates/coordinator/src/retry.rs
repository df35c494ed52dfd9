//! Retry utilities with exponential backoff for transient chain and relay failures.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::CoordinatorError;

/// Backoff parameters for read-side and idempotent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { initial_delay_ms: 100, max_delay_ms: 5_000, max_retries: 4 }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self { initial_delay_ms: 0, max_delay_ms: 0, max_retries: 0 }
    }

    fn delay(&self, attempt: usize) -> Duration {
        let base_delay = self.initial_delay_ms.saturating_mul(1 << attempt.min(10));
        let capped_delay = base_delay.min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped_delay / 4);
        Duration::from_millis(capped_delay + jitter)
    }
}

/// Whether a transport-level error message describes a transient condition.
pub(crate) fn is_transient_message(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("connection")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("429")
        || msg.contains("503")
        || msg.contains("502")
        || msg.contains("504")
        || msg.contains("temporarily unavailable")
        || msg.contains("network")
        || msg.contains("reset by peer")
        || msg.contains("broken pipe")
        || msg.contains("eof")
}

pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut f: F,
) -> Result<T, CoordinatorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, CoordinatorError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() {
                    debug!(
                        operation = %operation_name,
                        error = %err,
                        "Non-transient error, not retrying"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    warn!(
                        operation = %operation_name,
                        attempts = %attempt,
                        error = %err,
                        "Max retries exceeded"
                    );
                    return Err(err);
                }

                let delay = policy.delay(attempt);
                warn!(
                    operation = %operation_name,
                    attempt = %(attempt + 1),
                    max_attempts = %policy.max_retries,
                    delay_ms = %delay.as_millis(),
                    error = %err,
                    "Transient error, retrying"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAST: RetryPolicy = RetryPolicy { initial_delay_ms: 1, max_delay_ms: 2, max_retries: 3 };

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("flaky", &FAST, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CoordinatorError::relay_unreachable("connection refused"))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_on_non_retryable_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry("missing", &FAST, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoordinatorError::ProposalNotFound(Default::default()))
        })
        .await;

        assert!(matches!(result, Err(CoordinatorError::ProposalNotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry("down", &FAST, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoordinatorError::chain_unreachable("503 service unavailable"))
        })
        .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), FAST.max_retries + 1);
    }

    #[test]
    fn transient_messages() {
        assert!(is_transient_message("error sending request: Connection refused"));
        assert!(is_transient_message("HTTP 429 Too Many Requests"));
        assert!(!is_transient_message("execution reverted: GS026"));
    }
}
