//! Collection cycle implementation split into focused submodules.
//!
//! The `Collector` struct and its methods are organized by cycle step:
//! - [`submit`] - Job submission fan-out
//! - [`poll`] - Job status state machine
//! - [`download`] - Bundle fetch and atomic store writes
//! - [`scheduler`] - Interval loop and shutdown handling
//!
//! Retention pruning runs at the end of every cycle from [`Collector::run_cycle_at`].

mod download;
mod poll;
mod scheduler;
mod submit;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

pub use scheduler::next_delay;

use crate::client::{ControllerClient, HttpControllerClient};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::resolve_devices;
use crate::retention;
use crate::store::BundleStore;
use crate::types::{CycleReport, Device, Event};
use chrono::{DateTime, SubsecRound, Utc};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Buffer size of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Scheduled bundle collector (cloneable - all fields are Arc-wrapped)
///
/// Owns the resolved device list, the controller client, the retention store and
/// the event bus. Devices are resolved once at construction and reused for every
/// cycle; per-cycle job state lives only inside [`run_cycle_at`](Self::run_cycle_at).
#[derive(Clone)]
pub struct Collector {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Controller client (trait object so tests can script the controller)
    pub(crate) client: Arc<dyn ControllerClient>,
    /// Devices resolved at startup, in configuration order
    pub(crate) devices: Arc<Vec<Device>>,
    /// Retention store
    pub(crate) store: Arc<BundleStore>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
}

/// Per-cycle values passed to every step instead of living on the collector
pub(crate) struct CycleContext {
    /// Cycle start (UTC, whole seconds); names every artifact of the cycle
    pub(crate) started_at: DateTime<Utc>,
    /// Fires when the process is shutting down
    pub(crate) cancel: CancellationToken,
}

impl CycleContext {
    /// Run `fut` unless shutdown is requested first
    ///
    /// A cancelled future is dropped; in-flight requests are abandoned and the
    /// step returns [`Error::ShuttingDown`].
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::ShuttingDown),
            output = fut => Ok(output),
        }
    }
}

impl Collector {
    /// Create a collector talking to the configured controller over HTTPS
    ///
    /// This performs all startup work:
    /// - Validates the configuration
    /// - Creates the download directory if needed
    /// - Resolves every configured device (any failure is fatal)
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let client = HttpControllerClient::new(&config.connection, config.retry.clone())?;
        Self::with_client(config, Arc::new(client)).await
    }

    /// Create a collector on top of an existing controller client
    pub async fn with_client(config: Config, client: Arc<dyn ControllerClient>) -> Result<Self> {
        config.validate()?;

        let store = BundleStore::new(&config.download_path);
        store.ensure().await?;
        tracing::info!(
            path = %store.root().display(),
            "Will download bundles into {}",
            store.root().display()
        );

        let devices = resolve_devices(client.as_ref(), &config.airwall_ids).await?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            client,
            devices: Arc::new(devices),
            store: Arc::new(store),
            event_tx,
        })
    }

    /// Devices resolved at startup
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Retention store
    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    /// Subscribe to collector events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: Event) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Run one cycle starting now
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        self.run_cycle_at(Utc::now(), cancel).await
    }

    /// Run one submit, poll, download and prune pass with an explicit start time
    ///
    /// Per-device failures are recorded in the returned report and never abort the
    /// cycle. The only error is [`Error::ShuttingDown`], returned when `cancel` fires
    /// before the cycle finishes.
    pub async fn run_cycle_at(
        &self,
        started_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let clock = std::time::Instant::now();
        let ctx = CycleContext {
            started_at: started_at.trunc_subsecs(0),
            cancel: cancel.clone(),
        };
        tracing::info!(started_at = %ctx.started_at, devices = self.devices.len(), "Starting collection cycle");
        self.emit(Event::CycleStarted {
            started_at: ctx.started_at,
        });

        let mut states = self.submit_all(&ctx).await?;
        self.poll_until_terminal(&ctx, &mut states).await?;
        let outcomes = self.download_completed(&ctx, states).await?;
        let pruned = self.prune_expired(&ctx).await?;

        let report = CycleReport {
            started_at: ctx.started_at,
            elapsed: clock.elapsed(),
            outcomes,
            pruned,
        };
        tracing::info!(
            started_at = %report.started_at,
            saved = report.saved(),
            failed = report.failed(),
            pruned = report.pruned.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Collection cycle complete"
        );
        self.emit(Event::CycleComplete {
            started_at: report.started_at,
            saved: report.saved(),
            failed: report.failed(),
            pruned: report.pruned.len(),
        });
        Ok(report)
    }

    async fn prune_expired(&self, ctx: &CycleContext) -> Result<Vec<PathBuf>> {
        let report = ctx
            .guard(retention::prune(&self.store, ctx.started_at, self.config.rollover))
            .await?;
        tracing::debug!(
            removed = report.removed.len(),
            retained = report.retained,
            ignored = report.ignored,
            failed = report.failed,
            stale_partials = report.stale_partials.len(),
            "Retention pass finished"
        );
        for path in &report.removed {
            self.emit(Event::BundlePruned { path: path.clone() });
        }
        Ok(report.removed)
    }

    /// Width of the per-step worker pool
    pub(crate) fn concurrency(&self) -> usize {
        self.config.max_concurrent_requests.max(1)
    }
}
