//! Exponential backoff for provider calls

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::BatchConfig;
use crate::provider::ProviderError;

/// How often and how patiently to retry transient failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles after each failure
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: config.retry_base_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only `ProviderError::Transient` is retried. `op` receives the 1-based
/// attempt number.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    "{} failed on attempt {}/{}, retrying in {:?}: {}",
                    label, attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                warn!("{} failed after {} attempt(s): {}", label, attempt, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_backoff(&fast_policy(3), "test", |_| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ProviderError::Transient(format!("attempt {n}")))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_backoff(&fast_policy(3), "test", |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transient("down".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_backoff(&fast_policy(5), "test", |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Rejected("401".into()))
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_one_based() {
        let mut seen = Vec::new();
        let _: Result<(), _> = with_backoff(&fast_policy(2), "test", |attempt| {
            seen.push(attempt);
            async { Err(ProviderError::Transient("x".into())) }
        })
        .await;
        assert_eq!(seen, vec![1, 2]);
    }
}
