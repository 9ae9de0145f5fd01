//! Bundle download into the retention store.

use futures::stream::{self, StreamExt};
use std::path::PathBuf;

use crate::error::Result;
use crate::retention::ArtifactName;
use crate::types::{Device, DeviceOutcome, Event, JobState, ResultLocator};

use super::{Collector, CycleContext};

impl Collector {
    /// Fetch and store the bundle of every `Complete` device
    ///
    /// Consumes the final job states and returns one outcome per device. Devices in
    /// `Error` or `Failed` are skipped.
    pub(crate) async fn download_completed(
        &self,
        ctx: &CycleContext,
        states: Vec<JobState>,
    ) -> Result<Vec<DeviceOutcome>> {
        let started_at = ctx.started_at;
        let ready: Vec<(usize, ResultLocator)> = states
            .iter()
            .enumerate()
            .filter_map(|(idx, state)| match state {
                JobState::Complete { result } => Some((idx, result.clone())),
                _ => None,
            })
            .collect();

        let downloads = stream::iter(ready)
            .map(|(idx, result)| async move {
                let device = &self.devices[idx];
                let name = ArtifactName::new(started_at, device.artifact_id());
                (idx, self.download_one(device, &result, &name).await)
            })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<_>>();
        let results = ctx.guard(downloads).await?;

        let mut outcomes: Vec<DeviceOutcome> = self
            .devices
            .iter()
            .zip(states)
            .map(|(device, state)| DeviceOutcome {
                device_id: device.id.clone(),
                state,
                artifact: None,
                download_error: None,
            })
            .collect();

        for (idx, result) in results {
            let outcome = &mut outcomes[idx];
            match result {
                Ok(path) => {
                    self.emit(Event::BundleSaved {
                        device_id: outcome.device_id.clone(),
                        path: path.clone(),
                    });
                    outcome.artifact = Some(path);
                }
                Err(e) => {
                    tracing::warn!(
                        device_id = %outcome.device_id,
                        error = %e,
                        error_code = e.error_code(),
                        "Failed to download bundle"
                    );
                    self.emit(Event::DownloadFailed {
                        device_id: outcome.device_id.clone(),
                        error: e.to_string(),
                    });
                    outcome.download_error = Some(e.to_string());
                }
            }
        }
        Ok(outcomes)
    }

    async fn download_one(
        &self,
        device: &Device,
        result: &ResultLocator,
        name: &ArtifactName,
    ) -> Result<PathBuf> {
        let target = self.store.path_for(name);
        tracing::info!(
            device_id = %device.id,
            path = %target.display(),
            "downloading bundle to {}",
            target.display()
        );

        let bytes = self.client.fetch_bundle(result).await?;
        let size = bytes.len();
        let path = self.store.write(name, bytes).await?;
        tracing::debug!(device_id = %device.id, bytes = size, "Bundle written");
        Ok(path)
    }
}
