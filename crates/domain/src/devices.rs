//! Runtime device snapshots.

use crate::shared_kernel::{DeviceId, DeviceStatus, Location};
use serde::{Deserialize, Serialize};

/// Point-in-time view of one device, produced by idle discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub location: Option<Location>,
}

impl DeviceInfo {
    pub fn new(device_id: DeviceId, status: DeviceStatus, location: Option<Location>) -> Self {
        Self {
            device_id,
            status,
            location,
        }
    }
}
