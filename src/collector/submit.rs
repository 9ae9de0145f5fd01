//! Bundle job submission.

use futures::stream::{self, StreamExt};

use crate::error::Result;
use crate::types::{Device, Event, JobState};

use super::{Collector, CycleContext};

impl Collector {
    /// Request a bundle for every device, returning one state per device
    ///
    /// Devices whose request fails are marked `Error` and excluded from the rest of
    /// the cycle; the others continue independently.
    pub(crate) async fn submit_all(&self, ctx: &CycleContext) -> Result<Vec<JobState>> {
        let submissions = stream::iter(0..self.devices.len())
            .map(|idx| async move { (idx, self.submit_one(&self.devices[idx]).await) })
            .buffer_unordered(self.concurrency())
            .collect::<Vec<_>>();
        let results = ctx.guard(submissions).await?;

        let mut states = vec![JobState::Idle; self.devices.len()];
        for (idx, state) in results {
            states[idx] = state;
        }
        Ok(states)
    }

    async fn submit_one(&self, device: &Device) -> JobState {
        tracing::info!(
            device_id = %device.id,
            "Requesting bundle for {}",
            device.display_name()
        );

        match self.client.submit_bundle_job(&device.id).await {
            Ok(job) => {
                tracing::debug!(device_id = %device.id, job_id = %job, "Bundle job accepted");
                self.emit(Event::JobSubmitted {
                    device_id: device.id.clone(),
                    job: job.clone(),
                });
                JobState::Submitted { job }
            }
            Err(e) => {
                tracing::warn!(
                    device_id = %device.id,
                    error = %e,
                    error_code = e.error_code(),
                    "Bundle request failed, skipping device this cycle"
                );
                self.emit(Event::SubmissionFailed {
                    device_id: device.id.clone(),
                    error: e.to_string(),
                });
                JobState::Error {
                    reason: e.to_string(),
                }
            }
        }
    }
}
