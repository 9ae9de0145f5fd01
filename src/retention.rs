//! Artifact naming and age-based pruning
//!
//! Every bundle is stored as `YYYY-MM-DDTHH:MM:SS_<device>`, the timestamp being the
//! UTC start of the cycle that collected it. The prefix is fixed-width and must
//! round-trip exactly; any file that does not match is not a managed artifact and is
//! left alone.

use crate::store::{BundleStore, is_partial};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// `strftime` format of the artifact timestamp prefix
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Length of a formatted timestamp prefix
const TIMESTAMP_LEN: usize = 19;

/// Separator between the timestamp prefix and the device part
const SEPARATOR: char = '_';

/// Why a file name is not a managed artifact name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactNameError {
    /// Shorter than a timestamp prefix plus separator
    #[error("name is too short to carry a timestamp prefix")]
    TooShort,

    /// Prefix is not a `YYYY-MM-DDTHH:MM:SS` timestamp
    #[error("invalid timestamp prefix '{0}'")]
    InvalidTimestamp(String),

    /// No `_` right after the timestamp
    #[error("missing '_' after timestamp prefix")]
    MissingSeparator,

    /// Nothing after the separator
    #[error("missing device identifier")]
    EmptyDevice,
}

/// Parsed artifact file name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactName {
    taken_at: DateTime<Utc>,
    device: String,
}

impl ArtifactName {
    /// Name for a bundle collected in the cycle started at `taken_at`
    ///
    /// Sub-second precision is dropped; the name only carries whole seconds.
    pub fn new(taken_at: DateTime<Utc>, device: impl Into<String>) -> Self {
        Self {
            taken_at: taken_at.trunc_subsecs(0),
            device: device.into(),
        }
    }

    /// Parse a file name, failing explicitly on any deviation from the format
    ///
    /// ```
    /// use airwall_bundler::retention::ArtifactName;
    ///
    /// let name = ArtifactName::parse("2024-03-01T12:00:00_0001.0002").unwrap();
    /// assert_eq!(name.device(), "0001.0002");
    /// assert!(ArtifactName::parse("notes.txt").is_err());
    /// ```
    pub fn parse(name: &str) -> Result<Self, ArtifactNameError> {
        if name.len() <= TIMESTAMP_LEN {
            return Err(ArtifactNameError::TooShort);
        }
        let stamp = name
            .get(..TIMESTAMP_LEN)
            .ok_or(ArtifactNameError::TooShort)?;
        let rest = &name[TIMESTAMP_LEN..];

        let parsed = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|_| ArtifactNameError::InvalidTimestamp(stamp.to_string()))?;
        // reject lenient forms chrono would accept (e.g. unpadded fields)
        if parsed.format(TIMESTAMP_FORMAT).to_string() != stamp {
            return Err(ArtifactNameError::InvalidTimestamp(stamp.to_string()));
        }

        let device = rest
            .strip_prefix(SEPARATOR)
            .ok_or(ArtifactNameError::MissingSeparator)?;
        if device.is_empty() {
            return Err(ArtifactNameError::EmptyDevice);
        }

        Ok(Self {
            taken_at: parsed.and_utc(),
            device: device.to_string(),
        })
    }

    /// Start of the cycle that collected the artifact
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Device part of the name
    pub fn device(&self) -> &str {
        &self.device
    }

    /// True when `cycle_start - rollover > taken_at`
    ///
    /// An artifact exactly `rollover` old is kept. A rollover too large to represent
    /// never expires anything.
    pub fn is_expired(&self, cycle_start: DateTime<Utc>, rollover: Duration) -> bool {
        let Ok(rollover) = chrono::Duration::from_std(rollover) else {
            return false;
        };
        match cycle_start.checked_sub_signed(rollover) {
            Some(cutoff) => cutoff > self.taken_at,
            None => false,
        }
    }
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.taken_at.format(TIMESTAMP_FORMAT),
            SEPARATOR,
            self.device
        )
    }
}

/// What a pruning pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Artifacts deleted
    pub removed: Vec<PathBuf>,
    /// Managed artifacts still within the rollover window
    pub retained: usize,
    /// Files that are not managed artifacts
    pub ignored: usize,
    /// Expired artifacts that could not be deleted
    pub failed: usize,
    /// Temporary files of interrupted writes that were deleted
    pub stale_partials: Vec<PathBuf>,
}

/// Delete every artifact older than `rollover`, relative to `cycle_start`
///
/// Never fails: a store that cannot be listed or a file that cannot be deleted is
/// logged and skipped. Artifact writes are held back while the scan runs, so
/// temporary files found by the scan were left by a crashed writer and are
/// removed too.
pub async fn prune(store: &BundleStore, cycle_start: DateTime<Utc>, rollover: Duration) -> PruneReport {
    let _exclusive = store.lock_exclusive().await;
    let mut report = PruneReport::default();

    let entries = match store.entries().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = ?store.root(), error = %e, "Could not list retention store, skipping prune");
            return report;
        }
    };

    for entry in entries {
        if is_partial(&entry.name) {
            info!(file = %entry.name, "Removing leftover partial download");
            match tokio::fs::remove_file(&entry.path).await {
                Ok(()) => report.stale_partials.push(entry.path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(file = %entry.name, error = %e, "Failed to remove partial download");
                    report.failed += 1;
                }
            }
            continue;
        }

        let name = match ArtifactName::parse(&entry.name) {
            Ok(name) => name,
            Err(reason) => {
                debug!(file = %entry.name, %reason, "Not a managed bundle, leaving in place");
                report.ignored += 1;
                continue;
            }
        };

        if !name.is_expired(cycle_start, rollover) {
            report.retained += 1;
            continue;
        }

        info!(file = %entry.name, "Removing bundle");
        match tokio::fs::remove_file(&entry.path).await {
            Ok(()) => report.removed.push(entry.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %entry.name, "Bundle already gone");
            }
            Err(e) => {
                warn!(file = %entry.name, error = %e, "Failed to remove bundle");
                report.failed += 1;
            }
        }
    }

    report
}
