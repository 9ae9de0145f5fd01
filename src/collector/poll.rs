//! Job status polling.
//!
//! Every round queries all devices that are still `Submitted` or `InProgress`, then
//! waits `poll_interval` before the next round. Terminal devices are never polled
//! again. Devices still running when `job_timeout` elapses are marked `Failed`.

use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::error::Result;
use crate::types::{Device, Event, JobHandle, JobState, ReportedStatus};

use super::{Collector, CycleContext};

impl Collector {
    /// Poll until every submitted job has reached a terminal state
    pub(crate) async fn poll_until_terminal(
        &self,
        ctx: &CycleContext,
        states: &mut [JobState],
    ) -> Result<()> {
        let job_timeout = self.config.polling.job_timeout;
        // None when the timeout is beyond what the clock can represent
        let deadline = Instant::now().checked_add(job_timeout);
        let mut round: u32 = 0;

        loop {
            let pending: Vec<(usize, JobHandle)> = states
                .iter()
                .enumerate()
                .filter_map(|(idx, state)| state.pollable_job().map(|job| (idx, job.clone())))
                .collect();
            if pending.is_empty() {
                break;
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                for (idx, job) in pending {
                    let device = &self.devices[idx];
                    tracing::warn!(
                        device_id = %device.id,
                        job_id = %job,
                        timeout_secs = job_timeout.as_secs(),
                        "Bundle job did not finish in time"
                    );
                    let state = JobState::Failed {
                        reason: format!(
                            "job {job} still running after {}s",
                            job_timeout.as_secs_f64()
                        ),
                    };
                    self.finish(device, &state);
                    states[idx] = state;
                }
                break;
            }

            round += 1;
            tracing::debug!(round, pending = pending.len(), "Polling bundle jobs");

            let polls = stream::iter(pending)
                .map(|(idx, job)| async move {
                    let next = self.poll_one(&self.devices[idx], &job).await;
                    (idx, next)
                })
                .buffer_unordered(self.concurrency())
                .collect::<Vec<_>>();
            let results = ctx.guard(polls).await?;

            let mut running = false;
            for (idx, next) in results {
                if next.is_terminal() {
                    self.finish(&self.devices[idx], &next);
                } else {
                    running = true;
                }
                states[idx] = next;
            }

            if running {
                let nap = self.config.polling.poll_interval;
                let nap = deadline.map_or(nap, |deadline| {
                    nap.min(deadline.saturating_duration_since(Instant::now()))
                });
                ctx.guard(tokio::time::sleep(nap)).await?;
            }
        }
        Ok(())
    }

    async fn poll_one(&self, device: &Device, job: &JobHandle) -> JobState {
        let report = match self.client.job_status(job).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(
                    device_id = %device.id,
                    job_id = %job,
                    error = %e,
                    error_code = e.error_code(),
                    "Could not poll bundle job"
                );
                return JobState::Error {
                    reason: e.to_string(),
                };
            }
        };

        match report.classify() {
            ReportedStatus::Running => {
                tracing::debug!(
                    device_id = %device.id,
                    job_id = %job,
                    status = %report.status,
                    "Bundle job still running"
                );
                JobState::InProgress { job: job.clone() }
            }
            ReportedStatus::Complete(result) => {
                tracing::info!(device_id = %device.id, job_id = %job, uri = %result, "Bundle job complete");
                JobState::Complete { result }
            }
            ReportedStatus::Failed(reason) => {
                tracing::warn!(device_id = %device.id, job_id = %job, %reason, "Bundle job failed");
                JobState::Failed { reason }
            }
        }
    }

    fn finish(&self, device: &Device, state: &JobState) {
        self.emit(Event::JobFinished {
            device_id: device.id.clone(),
            state: state.clone(),
        });
    }
}
