//! Shared test helpers: a scripted in-memory controller and collector setup.

use crate::client::ControllerClient;
use crate::collector::Collector;
use crate::config::Config;
use crate::error::{ControllerError, Error, Result};
use crate::types::{DeviceInfo, JobHandle, JobStatusReport, ResultLocator};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct FakeState {
    devices: HashMap<String, DeviceInfo>,
    rejected_submissions: HashMap<String, u16>,
    statuses: HashMap<String, VecDeque<JobStatusReport>>,
    broken_jobs: Vec<String>,
    bundles: HashMap<String, Vec<u8>>,
    calls: Vec<String>,
}

/// Scripted controller
///
/// - every registered device accepts submissions with job id `job-<device id>`
///   unless [`reject_submission`](Self::reject_submission) was called for it
/// - job statuses are replayed in order; the last one repeats forever (default `progress`)
/// - bundles are served by uri; unknown uris answer 404
///
/// Clones share state, so a clone handed to a collector can still be inspected.
#[derive(Clone, Default)]
pub(crate) struct FakeController {
    state: Arc<Mutex<FakeState>>,
}

impl FakeController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_device(self, id: &str, uid: Option<&str>, title: Option<&str>) -> Self {
        self.state.lock().unwrap().devices.insert(
            id.to_string(),
            DeviceInfo {
                uid: uid.map(str::to_string),
                title: title.map(str::to_string),
            },
        );
        self
    }

    pub(crate) fn reject_submission(self, id: &str, status: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .rejected_submissions
            .insert(id.to_string(), status);
        self
    }

    /// Script the status sequence of a job: `(status, uri)` pairs
    pub(crate) fn with_statuses(self, job: &str, steps: &[(&str, Option<&str>)]) -> Self {
        let reports = steps
            .iter()
            .map(|(status, uri)| JobStatusReport {
                status: status.to_string(),
                uri: uri.map(str::to_string),
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .statuses
            .insert(job.to_string(), reports);
        self
    }

    /// Status queries for `job` fail at the transport level
    pub(crate) fn break_job(self, job: &str) -> Self {
        self.state.lock().unwrap().broken_jobs.push(job.to_string());
        self
    }

    pub(crate) fn with_bundle(self, uri: &str, bytes: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .bundles
            .insert(uri.to_string(), bytes.to_vec());
        self
    }

    /// Every call made so far: `device:<id>`, `submit:<id>`, `status:<job>`, `fetch:<uri>`
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count_calls(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

fn unexpected(endpoint: String, status: u16) -> Error {
    Error::Controller(ControllerError::UnexpectedStatus {
        endpoint,
        status,
        body: String::new(),
    })
}

#[async_trait]
impl ControllerClient for FakeController {
    async fn device_info(&self, device_id: &str) -> Result<DeviceInfo> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("device:{device_id}"));
        state
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| unexpected(format!("/api/v1/hipservices/{device_id}"), 404))
    }

    async fn submit_bundle_job(&self, device_id: &str) -> Result<JobHandle> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("submit:{device_id}"));
        let endpoint = format!("/api/v1/hipservices/{device_id}/support_bundle");
        if let Some(status) = state.rejected_submissions.get(device_id) {
            return Err(unexpected(endpoint, *status));
        }
        if !state.devices.contains_key(device_id) {
            return Err(unexpected(endpoint, 404));
        }
        Ok(JobHandle(format!("job-{device_id}")))
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatusReport> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("status:{job}"));
        if state.broken_jobs.contains(&job.0) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by controller",
            )));
        }
        let script = state.statuses.entry(job.0.clone()).or_default();
        let report = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(report.unwrap_or(JobStatusReport {
            status: "progress".to_string(),
            uri: None,
        }))
    }

    async fn fetch_bundle(&self, result: &ResultLocator) -> Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("fetch:{result}"));
        state
            .bundles
            .get(&result.0)
            .cloned()
            .ok_or_else(|| unexpected(format!("/api/v1/{result}"), 404))
    }
}

/// Fast-polling configuration for the given devices, storing into `dir`
pub(crate) fn test_config(dir: &Path, ids: &[&str]) -> Config {
    let mut config = Config::default();
    config.download_path = dir.to_path_buf();
    config.airwall_ids = ids.iter().map(|id| id.to_string()).collect();
    config.connection.conductor_url = "conductor.test".to_string();
    config.connection.client_id = "client".to_string();
    config.connection.api_token = "token".to_string();
    config.polling.poll_interval = Duration::from_millis(10);
    config.polling.job_timeout = Duration::from_secs(5);
    config
}

/// Build a collector on top of `fake` with a scratch retention store.
/// Returns the collector and the tempdir (which must be kept alive).
pub(crate) async fn create_test_collector(fake: &FakeController, ids: &[&str]) -> (Collector, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(temp_dir.path(), ids);
    let collector = Collector::with_client(config, Arc::new(fake.clone()))
        .await
        .unwrap();
    (collector, temp_dir)
}
