//! # airwall-bundler
//!
//! Scheduled collector of diagnostic bundles from Airwall devices.
//!
//! Every cycle asks the controller to generate a support bundle for each configured
//! device, polls the resulting jobs until they finish, downloads the bundles into a
//! local retention directory and deletes bundles older than the rollover window.
//!
//! ## Design
//!
//! - **One failure, one device** - a device whose request fails is recorded and
//!   skipped; the cycle and the other devices carry on
//! - **Bounded** - job polling has a deadline and per-step work runs on a bounded pool
//! - **Crash-safe store** - bundles are written atomically, so an interrupted cycle
//!   never leaves a truncated file under a managed name
//! - **Event-driven** - consumers can subscribe to cycle events
//!
//! ## Quick Start
//!
//! ```no_run
//! use airwall_bundler::{Collector, Config, run_until_signal};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file(Path::new("bundler.json"))?;
//!     let collector = Collector::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = collector.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     run_until_signal(&collector).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Controller API client
pub mod client;
/// Collection cycle and scheduling
pub mod collector;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Device resolution at startup
pub mod resolver;
/// Artifact naming and pruning
pub mod retention;
/// Retry logic with exponential backoff
pub mod retry;
/// Retention store directory
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::{ControllerClient, HttpControllerClient};
pub use collector::Collector;
pub use config::Config;
pub use error::{ControllerError, Error, Result};
pub use types::{CycleReport, Device, DeviceOutcome, Event, JobState};

use tokio_util::sync::CancellationToken;

/// Run the collector until the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// A cycle in flight when the signal arrives is abandoned; bundles it already wrote
/// stay in the store.
pub async fn run_until_signal(collector: &Collector) -> Result<()> {
    let cancel = CancellationToken::new();
    let run = collector.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            cancel.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, stopping collector"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, stopping collector"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT, stopping collector");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM, stopping collector");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, stopping collector"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
