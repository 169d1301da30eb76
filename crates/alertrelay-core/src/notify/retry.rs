//! Bounded exponential-backoff retries

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::channels::DeliveryError;
use crate::config::RetryConfig;

/// Errors that know whether another attempt can help
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        DeliveryError::is_retryable(self)
    }
}

/// Retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `n` (0-based): `min(base * multiplier^n, max)`
    pub fn delay_for(&self, n: u32) -> Duration {
        let exponent = i32::try_from(n).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

/// Result of a retried operation
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Attempts made
    pub attempts: u32,
    pub result: Result<T, E>,
}

/// Runs an attempt under a [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` (given the 1-based attempt number) until it succeeds,
    /// fails with a non-retryable error, or the attempt ceiling is hit.
    ///
    /// `on_retry` runs after each retryable failure that will be retried,
    /// with the failed attempt number and the error text.
    pub async fn execute<T, E, F, Fut, R, RFut>(&self, mut attempt: F, mut on_retry: R) -> RetryOutcome<T, E>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32, String) -> RFut,
        RFut: Future<Output = ()>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt(attempts).await {
                Ok(value) => {
                    return RetryOutcome {
                        attempts,
                        result: Ok(value),
                    }
                }
                Err(e) if e.is_retryable() && attempts < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempts - 1);
                    warn!(attempt = attempts, delay = ?delay, error = %e, "Attempt failed, retrying");
                    on_retry(attempts, e.to_string()).await;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return RetryOutcome {
                        attempts,
                        result: Err(e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
        })
    }

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_permanent_transient_failure_hits_ceiling() {
        let calls = AtomicU32::new(0);
        let retries = AtomicU32::new(0);

        let outcome: RetryOutcome<(), DeliveryError> = fast()
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(DeliveryError::Transient("timeout".to_string())) }
                },
                |_, _| {
                    retries.fetch_add(1, Ordering::SeqCst);
                    async {}
                },
            )
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
        assert!(outcome.result.is_err());
    }

    #[tokio::test]
    async fn test_config_errors_are_not_retried() {
        let outcome: RetryOutcome<(), DeliveryError> = fast()
            .execute(
                |_| async { Err(DeliveryError::Config("no token".to_string())) },
                |_, _| async {},
            )
            .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let outcome = fast()
            .execute(
                |n| async move {
                    if n < 2 {
                        Err(DeliveryError::Transient("503".to_string()))
                    } else {
                        Ok(n)
                    }
                },
                |_, _| async {},
            )
            .await;
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result.unwrap(), 2);
    }
}
