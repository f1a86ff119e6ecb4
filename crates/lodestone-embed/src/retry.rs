//! Exponential backoff with jitter for provider calls.

use std::time::Duration;

use rand::Rng;

use crate::error::{EmbedError, Result};

const BASE_BACKOFF_MS: u64 = 500;

/// Retry budget for a single logical provider call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first failure.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// Delay before the next attempt: doubling base with equal jitter, overridden
/// by the server's `Retry-After` on rate limits.
fn backoff_delay(attempt: u32, err: &EmbedError) -> Duration {
    if let EmbedError::RateLimited {
        retry_after_secs: Some(secs),
        ..
    } = err
    {
        return Duration::from_secs(*secs);
    }
    let exp = BASE_BACKOFF_MS << attempt;
    Duration::from_millis(exp / 2 + rand::rng().random_range(0..=exp / 2))
}

/// Run `op` up to `1 + max_retries` times, sleeping between attempts.
///
/// Only failures classified [`EmbedError::is_retryable`] re-enter the loop;
/// configuration errors and other permanent failures propagate on the spot.
///
/// # Errors
///
/// Returns the last error once the budget is exhausted, or the first
/// non-retryable error.
pub async fn with_retry<T, F, Fut>(provider: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let delay = backoff_delay(attempt, &err);
                tracing::warn!(
                    provider,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "embedding call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;

    use super::*;

    fn upstream() -> EmbedError {
        EmbedError::Upstream {
            provider: "mock",
            status: 503,
        }
    }

    fn rate_limited_now() -> EmbedError {
        EmbedError::RateLimited {
            provider: "mock",
            retry_after_secs: Some(0),
        }
    }

    #[test]
    fn backoff_honors_retry_after() {
        let err = EmbedError::RateLimited {
            provider: "mock",
            retry_after_secs: Some(7),
        };
        assert_eq!(backoff_delay(0, &err), Duration::from_secs(7));
        assert_eq!(backoff_delay(3, &err), Duration::from_secs(7));
    }

    #[test]
    fn backoff_grows_with_attempt() {
        let err = upstream();
        let first = backoff_delay(0, &err);
        assert!(first >= Duration::from_millis(250));
        assert!(first <= Duration::from_millis(500));
        let third = backoff_delay(2, &err);
        assert!(third >= Duration::from_millis(1000));
        assert!(third <= Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn succeeds_without_retrying() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("mock", RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn config_error_aborts_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry("mock", RetryPolicy { max_retries: 5 }, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EmbedError::MissingApiKey { provider: "mock" }) }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            EmbedError::MissingApiKey { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("mock", RetryPolicy { max_retries: 3 }, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(rate_limited_now())
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = with_retry("mock", RetryPolicy { max_retries: 2 }, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(rate_limited_now()) }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            EmbedError::RateLimited { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn upstream_error_retries_with_backoff() {
        let calls = AtomicUsize::new(0);
        let result = with_retry("mock", RetryPolicy { max_retries: 1 }, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n == 0 { Err(upstream()) } else { Ok(7) } }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn backoff_stays_within_envelope(attempt in 0u32..5) {
            let delay = backoff_delay(attempt, &upstream());
            let exp = BASE_BACKOFF_MS << attempt;
            prop_assert!(delay >= Duration::from_millis(exp / 2));
            prop_assert!(delay <= Duration::from_millis(exp));
        }
    }
}
