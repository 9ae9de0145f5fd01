//! Retry logic with exponential backoff
//!
//! Idempotent controller calls (device lookup, job status, bundle fetch) are wrapped
//! in [`with_retry`] so a single dropped connection or a controller restart does not
//! cost a device its bundle for the whole cycle.
//!
//! ```no_run
//! use airwall_bundler::config::RetryConfig;
//! use airwall_bundler::retry::with_retry;
//!
//! # async fn example(http: reqwest::Client) -> airwall_bundler::Result<()> {
//! let status = with_retry(&RetryConfig::default(), || async {
//!     let response = http
//!         .get("https://conductor.acme.com/api/v1/jobs/42")
//!         .send()
//!         .await?;
//!     Ok::<_, airwall_bundler::Error>(response.status())
//! })
//! .await?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{ControllerError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, controller overload) return `true`.
/// Permanent failures (unknown device, bad credentials, malformed responses) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
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
            Error::Controller(ControllerError::UnexpectedStatus { status, .. }) => {
                is_transient_status(*status)
            }
            Error::Controller(ControllerError::InvalidResponse { .. }) => false,
            Error::Config { .. }
            | Error::Resolution { .. }
            | Error::Serialization(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// 408, 429 and the 5xx range signal a controller that may answer differently later
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
///
/// `config.max_attempts` counts retries, so the operation runs at most
/// `max_attempts + 1` times. The last error is returned unchanged.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempt: u32 = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "Controller call recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(error = %err, attempts = attempt, "Giving up on controller call");
            return Err(err);
        };

        tracing::warn!(
            error = %err,
            attempt,
            retry_in_ms = delay.as_millis(),
            "Controller call failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Delay schedule of a single retried call
#[derive(Debug)]
struct Backoff<'a> {
    config: &'a RetryConfig,
    retries: u32,
    upcoming: Duration,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            retries: 0,
            upcoming: config.initial_delay.min(config.max_delay),
        }
    }

    /// Delay before the next retry, or `None` once the retry budget is spent
    fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_attempts {
            return None;
        }
        self.retries += 1;

        let delay = self.upcoming;
        let max = self.config.max_delay;
        let grown = delay.as_secs_f64() * self.config.backoff_multiplier;
        self.upcoming = Duration::try_from_secs_f64(grown).map_or(max, |grown| grown.min(max));

        Some(if self.config.jitter { add_jitter(delay) } else { delay })
    }
}

/// Stretch `delay` by a random factor in `[1, 2]` so devices do not retry in lockstep
fn add_jitter(delay: Duration) -> Duration {
    let extra = rand::thread_rng().gen_range(0.0..=1.0);
    delay.saturating_add(delay.mul_f64(extra))
}
