//! Gateway events published to external subscribers.
//!
//! Events are immutable facts. Each task reaches at most one of
//! `TaskSucceeded` / `TaskCancelled` and the failure events carry the
//! structured [`ErrorDetail`] with the wire-visible code.

use crate::shared_kernel::{DeviceId, DeviceStatus, ErrorDetail, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayEvent {
    /// A device read a barcode during an inbound move and awaits a verdict.
    BarcodeReceived {
        device_id: DeviceId,
        task_id: TaskId,
        barcode: String,
        occurred_at: DateTime<Utc>,
    },
    TaskSucceeded {
        device_id: DeviceId,
        task_id: TaskId,
        occurred_at: DateTime<Utc>,
    },
    TaskFailed {
        device_id: DeviceId,
        task_id: TaskId,
        error: ErrorDetail,
        occurred_at: DateTime<Utc>,
    },
    TaskCancelled {
        device_id: DeviceId,
        task_id: TaskId,
        occurred_at: DateTime<Utc>,
    },
    DeviceStatusChanged {
        device_id: DeviceId,
        new_status: DeviceStatus,
        previous_status: DeviceStatus,
        occurred_at: DateTime<Utc>,
    },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            GatewayEvent::BarcodeReceived { .. } => "barcode_received",
            GatewayEvent::TaskSucceeded { .. } => "task_succeeded",
            GatewayEvent::TaskFailed { .. } => "task_failed",
            GatewayEvent::TaskCancelled { .. } => "task_cancelled",
            GatewayEvent::DeviceStatusChanged { .. } => "device_status_changed",
        }
    }

    /// The device this event concerns.
    pub fn device_id(&self) -> &DeviceId {
        match self {
            GatewayEvent::BarcodeReceived { device_id, .. }
            | GatewayEvent::TaskSucceeded { device_id, .. }
            | GatewayEvent::TaskFailed { device_id, .. }
            | GatewayEvent::TaskCancelled { device_id, .. }
            | GatewayEvent::DeviceStatusChanged { device_id, .. } => device_id,
        }
    }

    /// The task this event concerns, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            GatewayEvent::BarcodeReceived { task_id, .. }
            | GatewayEvent::TaskSucceeded { task_id, .. }
            | GatewayEvent::TaskFailed { task_id, .. }
            | GatewayEvent::TaskCancelled { task_id, .. } => Some(task_id),
            GatewayEvent::DeviceStatusChanged { .. } => None,
        }
    }
}
