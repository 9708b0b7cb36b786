//! Retry logic with a fixed delay
//!
//! Per-chapter synthesis failures are retried a bounded number of times.
//! Whether an error is worth retrying is decided by the [`IsRetryable`]
//! classification, so the loop itself is a plain conditional.
//!
//! # Example
//!
//! ```no_run
//! use epub2audio::retry::{IsRetryable, RetryConfig, with_retry};
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let (result, attempts) = with_retry(&config, |_attempt| async {
//!     Ok::<_, MyError>(())
//! })
//! .await;
//! # }
//! ```

use crate::config::ProcessingConfig;
use crate::error::ProcessError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (a tool exiting non-zero, a timeout) return `true`.
/// Configuration and policy failures (a disallowed executable, an invalid
/// argument) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ProcessError {
    fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Timeout { .. } => true,
            ProcessError::ProcessFailed { .. } => true,
            // Tool claimed success but left nothing behind
            ProcessError::MissingOutput { .. } => true,
            ProcessError::DisallowedExecutable { .. } => false,
            ProcessError::InvalidArgument { .. } => false,
            ProcessError::NotFound { .. } => false,
            ProcessError::Io { .. } => false,
            ProcessError::Interrupted(_) => false,
        }
    }
}

/// Retry bounds for one operation
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`
    pub max_retries: u32,
    /// Delay between attempts
    pub delay: Duration,
    /// Add random jitter (0-100% of `delay`) to each wait
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
            jitter: false,
        }
    }
}

impl From<&ProcessingConfig> for RetryConfig {
    fn from(config: &ProcessingConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay,
            jitter: config.retry_jitter,
        }
    }
}

/// Run an async operation, retrying retryable failures
///
/// The operation receives the 1-based attempt number. Returns the final
/// result together with the number of attempts made, which is never more
/// than `max_retries + 1`.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> (Result<T, E>, u32)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt: u32 = 1;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "operation succeeded after retry");
                }
                return (Ok(result), attempt);
            }
            Err(e) if e.is_retryable() && attempt <= config.max_retries => {
                let wait = if config.jitter {
                    add_jitter(config.delay)
                } else {
                    config.delay
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = config.max_retries,
                    delay_ms = wait.as_millis(),
                    "operation failed, retrying"
                );

                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return (Err(e), attempt);
            }
        }
    }
}

/// Stretch a delay by a uniformly random 0-100%
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
