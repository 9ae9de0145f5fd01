//! Interval loop driving one cycle after another.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::Collector;

/// Time to wait before the next cycle
///
/// A cycle that took at least `interval` is followed immediately; there is no
/// catch-up for missed intervals.
///
/// ```
/// use airwall_bundler::collector::next_delay;
/// use std::time::Duration;
///
/// let interval = Duration::from_secs(600);
/// assert_eq!(next_delay(interval, Duration::from_secs(90)), Duration::from_secs(510));
/// assert_eq!(next_delay(interval, Duration::from_secs(700)), Duration::ZERO);
/// ```
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

impl Collector {
    /// Run cycles forever, sleeping out the rest of each interval
    ///
    /// Returns `Ok(())` once `cancel` fires, whether the collector was sleeping or in
    /// the middle of a cycle. Artifacts already written stay in the store.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            devices = self.devices.len(),
            interval_secs = self.config.interval.as_secs(),
            rollover_secs = self.config.rollover.as_secs(),
            "Collector started"
        );

        while !cancel.is_cancelled() {
            let clock = Instant::now();
            match self.run_cycle(&cancel).await {
                Ok(_) => {}
                Err(Error::ShuttingDown) => {
                    tracing::info!("Shutdown requested, abandoning current cycle");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, error_code = e.error_code(), "Collection cycle failed");
                }
            }

            let delay = next_delay(self.config.interval, clock.elapsed());
            tracing::info!(sleep_secs = delay.as_secs(), "Will sleep for {} seconds", delay.as_secs());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Collector stopped");
        Ok(())
    }
}
