//! Retry with exponential backoff for provider calls

use std::future::Future;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, SyncError, SyncResult};

/// Backoff settings for the collect stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total calls per operation, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Transient codes not marked permanent
pub fn is_retryable(err: &SyncError) -> bool {
    !err.code.is_permanent() && err.code.is_transient()
}

/// Call `operation` until it succeeds, fails permanently, or runs out of attempts
///
/// `on_retry(error, retry_number, delay)` runs before each backoff sleep.
/// Exhausting every attempt yields `RETRIES_EXHAUSTED` wrapping the last
/// error; a non-retryable error is returned as-is.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut on_retry: impl FnMut(&SyncError, u32, Duration),
    mut operation: F,
) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!("{label} failed after {attempt} attempts: {err}");
            return Err(SyncError::new(
                ErrorCode::RetriesExhausted,
                format!("{label} failed after {attempt} attempts: {}", err.message),
            )
            .with_retryable(true)
            .with_context("operation", label)
            .with_context("attempts", attempt)
            .with_context("lastErrorCode", err.code.as_str())
            .with_cause(err));
        }

        let delay = policy.delay_for(attempt);
        warn!(
            "{label} attempt {attempt}/{max_attempts} failed ({}), retrying in {}ms",
            err.code,
            delay.as_millis()
        );
        on_retry(&err, attempt, delay);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 150,
        }
    }

    #[test]
    fn test_default_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1600));
        assert_eq!(policy.delay_for(5), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(2000));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&SyncError::rate_limited("slow down")));
        assert!(is_retryable(&SyncError::new(
            ErrorCode::Custom("PROVIDER_TRANSIENT_BACKEND".into()),
            "x"
        )));
        assert!(!is_retryable(&SyncError::not_found("gone")));
        assert!(!is_retryable(&SyncError::not_configured("none")));
        assert!(!is_retryable(&SyncError::validation("bad")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Cell::new(0);
        let mut retries = Vec::new();

        let result = with_retry(
            &policy(),
            "getChannelStats",
            |err, retry, delay| retries.push((err.code.clone(), retry, delay)),
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(SyncError::provider(ErrorCode::ProviderTimeout, "slow"))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            retries,
            vec![
                (ErrorCode::ProviderTimeout, 1, Duration::from_millis(100)),
                (ErrorCode::ProviderTimeout, 2, Duration::from_millis(150)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let calls = Cell::new(0);

        let err = with_retry(
            &policy(),
            "getRecentItems",
            |_, _, _| {},
            || {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(SyncError::provider(ErrorCode::ProviderUnavailable, "down")) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 3);
        assert_eq!(err.code, ErrorCode::RetriesExhausted);
        assert!(err.retryable);
        assert_eq!(err.context["lastErrorCode"], "PROVIDER_UNAVAILABLE");
        assert!(err.cause.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = Cell::new(0);

        let err = with_retry(
            &policy(),
            "getChannelStats",
            |_, _, _| panic!("must not retry"),
            || {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(SyncError::not_found("no such channel")) }
            },
        )
        .await
        .unwrap_err();

        assert_eq!(calls.get(), 1);
        assert_eq!(err.code, ErrorCode::DataNotFound);
    }
}
