//! Device metadata resolution
//!
//! Runs once at startup. Every configured id must resolve; a single failure aborts
//! the whole resolution so the collector never runs against a partial device set.

use crate::client::ControllerClient;
use crate::error::{Error, Result};
use crate::types::Device;
use tracing::{debug, error, info};

/// Resolve configured device ids into device records, in configuration order
///
/// # Errors
///
/// - `Error::Config` if `ids` is empty
/// - `Error::Resolution` for the first id whose lookup fails
pub async fn resolve_devices(client: &dyn ControllerClient, ids: &[String]) -> Result<Vec<Device>> {
    if ids.is_empty() {
        return Err(Error::config(
            "airwall_ids",
            "must provide at least one Airwall UUID in airwall_ids",
        ));
    }

    let mut devices = Vec::with_capacity(ids.len());
    for id in ids {
        debug!(device_id = %id, "Looking up Airwall");
        match client.device_info(id).await {
            Ok(info) => {
                let device = Device::from_info(id, info);
                info!(device_id = %id, name = %device.display_name(), "Resolved Airwall");
                devices.push(device);
            }
            Err(e) => {
                error!(device_id = %id, error = %e, "Could not access Airwall info");
                return Err(Error::Resolution {
                    device_id: id.clone(),
                    source: Box::new(e),
                });
            }
        }
    }
    Ok(devices)
}
