//! Core types for airwall-bundler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A managed device, resolved once at startup and reused for every cycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Configured identifier, used in every controller request
    pub id: String,
    /// Identifier reported by the device itself (falls back to `id`)
    pub uid: String,
    /// Human-readable title, if the controller has one
    pub title: Option<String>,
}

impl Device {
    /// Build a device record from the controller's lookup response
    pub fn from_info(id: &str, info: DeviceInfo) -> Self {
        let uid = info
            .uid
            .filter(|uid| !uid.trim().is_empty())
            .unwrap_or_else(|| id.to_string());
        let title = info.title.filter(|title| !title.trim().is_empty());
        Self {
            id: id.to_string(),
            uid,
            title,
        }
    }

    /// Name used in log lines: `"<title> (<uid>)"`, or just the uid
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(title) => format!("{} ({})", title, self.uid),
            None => self.uid.clone(),
        }
    }

    /// Device part of an artifact filename
    ///
    /// Controller uids carry a routing prefix ending in `#` (e.g. `BHI@40130#`);
    /// only the part after the last `#` is kept. Path separators are replaced so the
    /// result is always a single path component.
    pub fn artifact_id(&self) -> String {
        let tail = self.uid.rsplit('#').next().unwrap_or(&self.uid);
        let tail = if tail.is_empty() { &self.id } else { tail };
        tail.chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                other => other,
            })
            .collect()
    }
}

/// Device metadata returned by the controller lookup
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device-reported identifier
    #[serde(default)]
    pub uid: Option<String>,
    /// Display title
    #[serde(default)]
    pub title: Option<String>,
}

/// Handle of a bundle job on the controller
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a finished bundle on the controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLocator(pub String);

impl std::fmt::Display for ResultLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-cycle job state of one device
///
/// `Idle -> Submitted -> InProgress* -> Complete | Failed`, with `Error` reachable
/// from any non-terminal state when a request for this device fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    /// Nothing requested yet this cycle
    Idle,
    /// Job accepted by the controller, not yet polled
    Submitted {
        /// Job to poll
        job: JobHandle,
    },
    /// Controller reports the job as still running
    InProgress {
        /// Job to poll
        job: JobHandle,
    },
    /// Bundle is ready for download
    Complete {
        /// Where to fetch the bundle from
        result: ResultLocator,
    },
    /// A request for this device failed (submission, poll transport, ...)
    Error {
        /// What went wrong
        reason: String,
    },
    /// The controller reported the job as failed, or it timed out
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl JobState {
    /// Terminal states are never polled again within a cycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Complete { .. } | JobState::Error { .. } | JobState::Failed { .. }
        )
    }

    /// Job handle to poll, for the non-terminal states that have one
    pub fn pollable_job(&self) -> Option<&JobHandle> {
        match self {
            JobState::Submitted { job } | JobState::InProgress { job } => Some(job),
            _ => None,
        }
    }

    /// Short lowercase label for logs and events
    pub fn label(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Submitted { .. } => "submitted",
            JobState::InProgress { .. } => "in_progress",
            JobState::Complete { .. } => "complete",
            JobState::Error { .. } => "error",
            JobState::Failed { .. } => "failed",
        }
    }
}

/// Job status document returned by the controller
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusReport {
    /// Status word, e.g. "progress" or "complete"
    #[serde(default)]
    pub status: String,
    /// Result location, present once the job is complete
    #[serde(default)]
    pub uri: Option<String>,
}

/// Interpretation of a [`JobStatusReport`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportedStatus {
    /// Job is still being worked on
    Running,
    /// Job finished and produced a bundle
    Complete(ResultLocator),
    /// Job finished without a bundle
    Failed(String),
}

impl JobStatusReport {
    /// Status words that mean the job has not finished yet
    pub const RUNNING_STATUSES: &'static [&'static str] =
        &["progress", "pending", "queued", "running"];

    /// Map the controller's status vocabulary onto the job state machine
    ///
    /// Unknown words are treated as failures rather than successes.
    pub fn classify(&self) -> ReportedStatus {
        let status = self.status.trim().to_ascii_lowercase();
        if Self::RUNNING_STATUSES.contains(&status.as_str()) {
            return ReportedStatus::Running;
        }
        match status.as_str() {
            "complete" => match self.uri.as_deref().map(str::trim) {
                Some(uri) if !uri.is_empty() => {
                    ReportedStatus::Complete(ResultLocator(uri.to_string()))
                }
                _ => ReportedStatus::Failed("job complete but no result uri reported".to_string()),
            },
            "error" | "failed" => {
                ReportedStatus::Failed(format!("controller reported job status '{status}'"))
            }
            "" => ReportedStatus::Failed("controller reported an empty job status".to_string()),
            other => ReportedStatus::Failed(format!("unrecognized job status '{other}'")),
        }
    }
}

/// Event emitted during the collection lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A cycle began
    CycleStarted {
        /// Cycle start time (whole seconds, UTC)
        started_at: DateTime<Utc>,
    },

    /// The controller accepted a bundle job
    JobSubmitted {
        /// Device id
        device_id: String,
        /// Job handle
        job: JobHandle,
    },

    /// A bundle job could not be submitted
    SubmissionFailed {
        /// Device id
        device_id: String,
        /// Error message
        error: String,
    },

    /// A job reached a terminal state
    JobFinished {
        /// Device id
        device_id: String,
        /// Final state
        state: JobState,
    },

    /// A bundle was written to the retention store
    BundleSaved {
        /// Device id
        device_id: String,
        /// Artifact path
        path: PathBuf,
    },

    /// A bundle could not be fetched or written
    DownloadFailed {
        /// Device id
        device_id: String,
        /// Error message
        error: String,
    },

    /// An expired bundle was deleted
    BundlePruned {
        /// Artifact path
        path: PathBuf,
    },

    /// A cycle finished
    CycleComplete {
        /// Cycle start time
        started_at: DateTime<Utc>,
        /// Number of bundles written
        saved: usize,
        /// Number of devices without a bundle this cycle
        failed: usize,
        /// Number of bundles pruned
        pruned: usize,
    },
}

/// Final result of one device within a cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceOutcome {
    /// Device id
    pub device_id: String,
    /// Terminal job state
    pub state: JobState,
    /// Artifact written this cycle
    pub artifact: Option<PathBuf>,
    /// Fetch or write failure for a complete job
    pub download_error: Option<String>,
}

/// Summary of one collection cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleReport {
    /// Cycle start time (whole seconds, UTC)
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the cycle
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
    /// One entry per device, in configuration order
    pub outcomes: Vec<DeviceOutcome>,
    /// Artifacts deleted by the pruner
    pub pruned: Vec<PathBuf>,
}

impl CycleReport {
    /// Number of artifacts written this cycle
    pub fn saved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.artifact.is_some()).count()
    }

    /// Number of devices that ended the cycle without an artifact
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.saved()
    }

    /// Outcome for a given device id
    pub fn outcome(&self, device_id: &str) -> Option<&DeviceOutcome> {
        self.outcomes.iter().find(|o| o.device_id == device_id)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
