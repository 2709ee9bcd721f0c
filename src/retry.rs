//! Retry logic with exponential backoff
//!
//! Transient catalog and transport failures are retried with exponential
//! backoff and optional jitter. Retry policy lives here and in the download
//! orchestrator only; the catalog client itself never retries.

use crate::config::RetryConfig;
use crate::error::{CatalogError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, catalog 5xx, connection reset)
/// return `true`. Permanent failures (file withdrawn from the catalog, hash
/// mismatch on the final bytes, malformed responses) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // The catalog being unreachable or answering 5xx is transient
            Error::Catalog(CatalogError::Unavailable(_)) => true,
            // A withdrawn file will not come back on retry
            Error::Catalog(CatalogError::FileNotFound { .. }) => false,
            // A body the descriptors reject will parse the same way next time
            Error::Catalog(CatalogError::MalformedResponse(_)) => false,
            // Transient I/O kinds only
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A corrupted transfer is retried as a whole fetch attempt, so the
            // mismatch itself is terminal for the attempt that produced it
            Error::HashMismatch { .. } | Error::SizeMismatch { .. } => false,
            Error::Archive(_) => false,
            Error::Config { .. } => false,
            Error::RequiredFileFailed { .. } => false,
            Error::Cancelled => false,
            Error::TaskJoin(_) => false,
        }
    }
}

/// Error wrapper for one whole transfer attempt (fetch plus verification)
///
/// A hash or size mismatch on freshly downloaded bytes usually means the
/// transfer was corrupted in flight, so re-fetching is worth the attempts the
/// policy allows. Outside a transfer attempt the same errors stay terminal.
#[derive(Debug)]
pub(crate) struct TransferAttempt(pub Error);

impl From<Error> for TransferAttempt {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl std::fmt::Display for TransferAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl IsRetryable for TransferAttempt {
    fn is_retryable(&self) -> bool {
        matches!(
            self.0,
            Error::HashMismatch { .. } | Error::SizeMismatch { .. }
        ) || self.0.is_retryable()
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Runs `operation` up to `1 + config.max_attempts` times, sleeping between
/// attempts with exponentially growing, optionally jittered delays capped at
/// `config.max_delay`. Non-retryable errors are returned immediately.
pub async fn fetch_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let jittered_delay = if config.jitter { add_jitter(delay) } else { delay };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// actual delay is between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
