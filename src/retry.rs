//! Retry logic with exponential backoff
//!
//! Transient failures of a single strategy attempt are retried in place before the
//! transfer engine gives up on that candidate. Delays grow exponentially with optional
//! jitter.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::retry::{IsRetryable, download_with_retry};
//! use media_dl::config::RetryConfig;
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
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! download_with_retry(&config, || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, FetchError};
use crate::transport::TransportError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Shortest wait the failing side asked for before the next try
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Once bytes are on disk the failure becomes a resume snapshot instead
            FetchError::Network { bytes_written, .. } => *bytes_written == 0,
            FetchError::Io(e) => is_transient_io(e),
            FetchError::Content { .. }
            | FetchError::Unavailable(_)
            | FetchError::Policy(_)
            | FetchError::SizeExceeded { .. }
            | FetchError::Cancelled => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => is_transient_io(e),
            Error::TransientNetwork { .. } => true,
            Error::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Transport(TransportError::RateLimited(wait)) => Some(*wait),
            _ => None,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
    )
}

/// Run `operation`, retrying transient failures with exponential backoff
///
/// `max_attempts` counts retries, so the operation runs at most `max_attempts + 1` times.
/// A rate-limit hint from the error raises the wait but never shortens it. Non-retryable
/// errors are returned at once.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;
    let mut backoff = config.initial_delay;

    loop {
        let e = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(attempts = retries + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !e.is_retryable() {
            tracing::debug!(error = %e, "Operation failed with non-retryable error");
            return Err(e);
        }
        if retries >= config.max_attempts {
            tracing::warn!(error = %e, attempts = retries + 1, "Giving up after retries");
            return Err(e);
        }
        retries += 1;

        let mut wait = if config.jitter {
            add_jitter(backoff)
        } else {
            backoff
        };
        if let Some(hint) = e.retry_after() {
            wait = wait.max(hint);
        }
        tracing::warn!(
            error = %e,
            retry = retries,
            max_attempts = config.max_attempts,
            wait_ms = wait.as_millis(),
            "Transient failure, retrying"
        );
        tokio::time::sleep(wait).await;

        backoff = Duration::from_secs_f64(backoff.as_secs_f64() * config.backoff_multiplier)
            .min(config.max_delay);
    }
}

/// Spread `delay` over `[delay, 2 * delay]`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
