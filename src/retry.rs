//! Retry Logic with Exponential Backoff
//!
//! The download coordinator never retries on its own; a failed transfer is
//! reported once to every waiter. Callers that want another attempt wrap the
//! operation in a `RetryPolicy`.
//!
//! ## Retriable vs Non-Retriable Errors
//!
//! Decided by `CacheError::is_transient`:
//! - **Retriable**: `TransferFailed` (network errors, timeouts, non-2xx),
//!   `Cancelled`, `HandleInitFailed`
//! - **Non-Retriable**: `InvalidContent`, `Io`, `PersistenceFailed`,
//!   `Config`, `ShutDown`
//!
//! ## Exponential Backoff
//!
//! Delays between retries grow exponentially to avoid hammering the origin:
//! - Attempt 1: No delay (immediate)
//! - Attempt 2: 200ms delay
//! - Attempt 3: 400ms delay (2x)
//! - Capped at max_backoff_ms to prevent excessive delays

use std::future::Future;
use std::time::Duration;

use crate::cache::{CacheError, CacheResult};
use crate::constants::{
    DEFAULT_RETRY_INITIAL_BACKOFF_MS, DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_BACKOFF_MS,
};

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial attempt)
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (cap for exponential growth)
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_backoff_ms: DEFAULT_RETRY_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_RETRY_MAX_BACKOFF_MS,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// Policy with default backoff and `retries` extra attempts
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }

    /// Calculate backoff delay for a given attempt number (0-indexed)
    ///
    /// # Arguments
    /// * `attempt` - The attempt number (0 = first attempt, 1 = first retry, etc.)
    ///
    /// # Returns
    /// Duration to wait before the next attempt (0 for first attempt)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        // Exponential backoff: initial_backoff * 2^(attempt-1)
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt - 1))
            .min(self.max_backoff_ms);

        Duration::from_millis(backoff_ms)
    }

    /// Check if we should retry after `error` on attempt `attempt` (0-indexed)
    pub fn should_retry(&self, attempt: u32, error: &CacheError) -> bool {
        if attempt.saturating_add(1) >= self.max_attempts {
            return false;
        }
        error.is_transient()
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempts = attempt + 1, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if self.should_retry(attempt, &e) => {
                    attempt += 1;
                    let delay = self.backoff_duration(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
