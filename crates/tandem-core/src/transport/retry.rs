//! Bounded retry with multiplicative backoff and an overall deadline

use crate::{Result, TandemError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of attempts per operation (first try included)
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt
const DEFAULT_INITIAL_DELAY_MS: u64 = 500;

const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound for a single backoff delay
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Deadline for the whole operation, retries included
const DEFAULT_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TandemError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(TandemError::Config(
                "retry.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(TandemError::Config(
                "retry.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry executor with exponential backoff.
///
/// Only transient failures are retried. The deadline covers every attempt;
/// when it fires the caller gives up but the in-flight backend call is not
/// aborted on the wire, so sends are at-least-once.
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

    /// Execute operation with retry
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = self.policy.timeout();

        match tokio::time::timeout(deadline, self.run(operation_name, operation)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation = operation_name,
                    "Operation timed out after {:?}", deadline
                );
                Err(TandemError::Timeout(deadline))
            }
        }
    }

    async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(
                            operation = operation_name,
                            attempt, "Operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "Giving up: {}",
                        e
                    );
                    return Err(TandemError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        operation = operation_name,
                        "Operation failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1))
            .with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy {
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 350,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(350));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let executor = RetryExecutor::new(fast_policy());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = executor
            .execute("flaky", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TandemError::Transient("offline".into()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let executor = RetryExecutor::new(fast_policy());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = executor
            .execute("down", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TandemError::Transient("offline".into()))
            })
            .await;

        match result {
            Err(TandemError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_retries_decryption_errors() {
        let executor = RetryExecutor::new(fast_policy());
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = executor
            .execute("decrypt", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TandemError::Decryption("bad tag".into()))
            })
            .await;

        assert!(matches!(result, Err(TandemError::Decryption(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overall_timeout() {
        let executor = RetryExecutor::new(
            RetryPolicy::default().with_timeout(Duration::from_millis(20)),
        );

        let result: Result<()> = executor
            .execute("slow", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(TandemError::Timeout(_))));
    }
}
