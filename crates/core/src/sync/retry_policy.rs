//! Bounded exponential-backoff retry for remote calls.

use std::future::Future;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::errors::{RemoteError, RemoteResult};

/// Retry policy classification for remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Retries a remote operation while it fails with a retryable error.
///
/// The delay before attempt `k` (1-indexed, `k >= 2`) is
/// `base_delay * 2^(k-2)`. No jitter is added and there is no sleep after the
/// final attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            attempt_timeout: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay).with_attempt_timeout(config.attempt_timeout)
    }

    /// Bound each individual attempt; an expired attempt counts as a timeout.
    pub fn with_attempt_timeout(mut self, attempt_timeout: Option<Duration>) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept before `attempt` (1-indexed). Zero for the first attempt.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    /// Returns the last error on exhaustion.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut op: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::timeout(format!(
                        "{} timed out after {}ms",
                        operation,
                        limit.as_millis()
                    ))),
                },
                None => op().await,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.retry_class() != SyncRetryClass::Retryable || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.delay_before_attempt(attempt + 1);
            debug!(
                "[Retry] {} attempt {}/{} failed ({}); retrying in {}ms",
                operation,
                attempt,
                self.max_attempts,
                err,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Exponential backoff for the background loop after failed cycles, capped.
pub fn backoff_seconds(consecutive_failures: u32) -> u64 {
    const MAX_EXPONENT: u32 = 8;
    const BASE_DELAY_SECONDS: u64 = 5;

    2_u64.pow(consecutive_failures.min(MAX_EXPONENT)) * BASE_DELAY_SECONDS
}
