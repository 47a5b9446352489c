//! Retry policy: backoff for transient failures of external calls.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::domain::Result;

/// Exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Total attempts including the first one.
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: 1,
        }
    }

    /// Delay before the retry that follows `attempts` failed attempts (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// Example with base_delay=200ms, multiplier=2.0:
    /// - attempt 1 (first failure): 200ms
    /// - attempt 2: 400ms
    /// - attempt 3: 800ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Runs `op` until it succeeds, fails permanently, or the attempts run out.
///
/// Only errors with `is_transient()` are retried.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempts < policy.max_attempts => {
                let delay = policy.next_delay(attempts);
                tracing::warn!(
                    operation = label,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RouterError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn default_policy_follows_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_millis(200));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);
        assert_eq!(d1, Duration::from_millis(200));
        assert_eq!(d2, Duration::from_millis(400));
        assert_eq!(d3, Duration::from_millis(800));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = retry_transient(&fast_policy(3), "test", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RouterError::EligibilityUnavailable("flaky".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_transient(&fast_policy(2), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RouterError::EligibilityUnavailable("down".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry_transient(&fast_policy(5), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RouterError::Config("bad".into()))
        })
        .await;

        assert!(matches!(result, Err(RouterError::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
