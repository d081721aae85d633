//! Retry logic with exponential backoff
//!
//! Two shapes of the same policy live here:
//! - [`with_retry`] wraps one async operation and retries it while its error is transient.
//! - [`Backoff`] hands out successive delays for loops that never give up, such as the
//!   broker reconnect supervisor.
//!
//! Both cap delays at `max_delay` and optionally add jitter to prevent thundering herd.
//!
//! # Example
//!
//! ```no_run
//! use capture_relay::retry::{IsRetryable, with_retry};
//! use capture_relay::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::RelayError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (a dropped socket, a broker that is momentarily busy) should return `true`.
/// Permanent failures (no connection at all, rejected credentials, bad input) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for RelayError {
    fn is_retryable(&self) -> bool {
        match self {
            RelayError::Transport(_) => true,
            // Fail fast: the supervisor owns reconnection, not the publisher
            RelayError::NotConnected | RelayError::LinkClosed => false,
            RelayError::Timeout { .. } | RelayError::Rejected(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error after all retry attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut backoff = Backoff::new(config.clone());

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                let delay = backoff.next_delay();

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Stateful exponential backoff
///
/// Each call to [`next_delay`](Backoff::next_delay) returns the current delay (jittered
/// if configured) and grows the base by `backoff_multiplier`, capped at `max_delay`.
/// `max_attempts` is not consulted; callers decide when to stop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `config.initial_delay`
    pub fn new(config: RetryConfig) -> Self {
        let current = config.initial_delay.min(config.max_delay);
        Self { config, current }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        let next = Duration::from_secs_f64(base.as_secs_f64() * self.config.backoff_multiplier);
        self.current = next.min(self.config.max_delay);

        if self.config.jitter {
            add_jitter(base)
        } else {
            base
        }
    }

    /// Start over from the initial delay (after a successful attempt)
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay.min(self.config.max_delay);
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
