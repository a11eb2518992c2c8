//! Cycle-level retry with a constant delay.
//!
//! A whole poll or write cycle is the unit of retry, never a single run or
//! register. Errors that cannot improve on another attempt (validation and
//! configuration errors) are returned as-is without waiting.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{BridgeError, BridgeResult};

/// Runs an operation until it succeeds or the attempts are used up.
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Build an executor; the policy is normalized (≥ 1 attempt, ≥ 100 ms).
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: RetryPolicy::new(policy.max_attempts, policy.delay),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.policy.delay
    }

    /// Run `op`, retrying retryable failures.
    ///
    /// Returns [`BridgeError::RetryExhausted`] carrying the last error when
    /// every attempt failed.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> BridgeResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BridgeResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= self.policy.max_attempts => {
                    warn!(attempts = attempt, error = %err, "retry exhausted");
                    return Err(BridgeError::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
