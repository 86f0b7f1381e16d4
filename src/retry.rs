//! Retry policy for provider calls that hit rate limits.

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::ratelimit::{RateLimiter, DEFAULT_MAX_BACKOFF_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Ceiling passed to `RateLimiter::backoff`.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retrying after `attempt` (0-indexed) failed.
    ///
    /// A provider-supplied `Retry-After` wins when it is longer than the backoff.
    pub fn delay_for(&self, attempt: u32, err: &SyncError) -> Duration {
        let backoff = RateLimiter::backoff_duration(attempt, Some(self.max_backoff_ms));
        match err {
            SyncError::RateLimited {
                retry_after: Some(after),
            } => backoff.max(*after).min(Duration::from_millis(self.max_backoff_ms)),
            _ => backoff,
        }
    }
}

/// Run `operation`, retrying rate-limited failures according to `policy`.
///
/// Any other error is returned immediately.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_rate_limited() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt, &err);
                tracing::debug!(
                    "Rate limited on {}, retrying in {:?} (attempt {})",
                    label,
                    delay,
                    attempt + 1
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
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn retry_after_extends_backoff_up_to_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 3,
            max_backoff_ms: 10_000,
        };
        let hinted = SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(4)),
        };
        assert_eq!(policy.delay_for(0, &hinted), Duration::from_secs(4));

        let far = SyncError::RateLimited {
            retry_after: Some(Duration::from_secs(600)),
        };
        assert_eq!(policy.delay_for(0, &far), Duration::from_secs(10));

        let plain = SyncError::RateLimited { retry_after: None };
        assert_eq!(policy.delay_for(2, &plain), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limited_calls_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let result = execute_with_retry(&RetryPolicy::default(), "ENG", || {
            let calls = Arc::clone(&calls_capture);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SyncError::RateLimited { retry_after: None })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let err = execute_with_retry(&RetryPolicy::default(), "ENG", || {
            let calls = Arc::clone(&calls_capture);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SyncError::RateLimited { retry_after: None })
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_other_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);

        let err = execute_with_retry(&RetryPolicy::default(), "ENG", || {
            let calls = Arc::clone(&calls_capture);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SyncError::not_found("ENG"))
            }
        })
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
