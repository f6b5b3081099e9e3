//! Retry logic for handling transient ClickHouse failures.
//!
//! Operations are retried only when the error is classified as transient
//! (see [`ServerError::is_transient`]); permanent errors propagate on the
//! first occurrence.

use crate::constants::{DEFAULT_RETRY_MAX_ATTEMPTS, DEFAULT_RETRY_MAX_DELAY, DEFAULT_RETRY_MIN_DELAY};
use crate::error::ServerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (for exponential backoff).
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::queries()
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (just execute once).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::queries()
        }
    }

    /// Retry policy for query execution: 3 attempts, exponential backoff
    /// between 1s and 10s.
    pub fn queries() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay: DEFAULT_RETRY_MIN_DELAY,
            max_delay: DEFAULT_RETRY_MAX_DELAY,
            multiplier: 2.0,
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);

        let capped_delay_ms = base_delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_delay_ms as u64)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successful result, if any.
    pub value: Option<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// The last error, if the operation failed.
    pub last_error: Option<ServerError>,
}

impl<T> RetryOutcome<T> {
    /// Check if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }

    /// Convert to a standard Result.
    pub fn into_result(self) -> Result<T, ServerError> {
        match self.value {
            Some(v) => Ok(v),
            None => Err(self
                .last_error
                .unwrap_or_else(|| ServerError::internal("Retry failed with no error captured"))),
        }
    }
}

/// Execute an async operation with retry logic.
///
/// The operation is retried when it returns a transient error, up to
/// `max_attempts` total attempts with exponential backoff between them.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, operation: F) -> RetryOutcome<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!("Retry attempt {} after {:?} delay", attempt + 1, delay);
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    value: Some(value),
                    attempts: attempt + 1,
                    last_error: None,
                };
            }
            Err(e) => {
                if !e.is_transient() {
                    debug!("Non-transient error, not retrying: {}", e);
                    return RetryOutcome {
                        value: None,
                        attempts: attempt + 1,
                        last_error: Some(e),
                    };
                }

                warn!(
                    "Transient error on attempt {}/{}: {}",
                    attempt + 1,
                    config.max_attempts,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    RetryOutcome {
        value: None,
        attempts: config.max_attempts,
        last_error,
    }
}

/// Simple retry wrapper that returns a standard Result.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ServerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    retry_async(config, operation).await.into_result()
}
