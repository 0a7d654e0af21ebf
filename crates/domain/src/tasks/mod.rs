//! Transport tasks submitted by the host software.

pub mod queue;

use crate::shared_kernel::{
    CommandType, Direction, GatewayError, Location, Result, TaskId, TaskPriority,
};
use shuttle_shared::ids::DeviceId;
use serde::{Deserialize, Serialize};

/// One pallet movement requested by the host software.
///
/// Immutable configuration; no runtime state lives here. Runtime state is
/// the queue entry and the assignment map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportTask {
    pub task_id: TaskId,
    pub command_type: CommandType,
    /// Optional device pin. Pinned tasks dispatch only to this device and
    /// are raised to high priority.
    pub device_id: Option<DeviceId>,
    pub source_location: Option<Location>,
    pub target_location: Option<Location>,
    pub gate_number: u16,
    pub in_dir_block: Direction,
    pub out_dir_block: Direction,
}

impl TransportTask {
    /// Field validation per command type.
    ///
    /// Inbound carries no locations at submission (the target comes from
    /// barcode validation); Outbound needs a source; Transfer needs both.
    pub fn validate(&self) -> Result<()> {
        if self.task_id.is_empty() {
            return Err(GatewayError::ValidationException {
                message: "task_id must not be empty".to_string(),
            });
        }
        if let Some(device_id) = &self.device_id {
            if device_id.is_empty() {
                return Err(GatewayError::ValidationException {
                    message: format!("task {} has an empty device pin", self.task_id),
                });
            }
        }
        match self.command_type {
            CommandType::Inbound => Ok(()),
            CommandType::Outbound => {
                if self.source_location.is_none() {
                    return Err(GatewayError::ValidationException {
                        message: format!(
                            "outbound task {} requires a source location",
                            self.task_id
                        ),
                    });
                }
                Ok(())
            }
            CommandType::Transfer => {
                if self.source_location.is_none() || self.target_location.is_none() {
                    return Err(GatewayError::ValidationException {
                        message: format!(
                            "transfer task {} requires source and target locations",
                            self.task_id
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    /// Dispatch priority: device-pinned tasks are high, the rest normal.
    pub fn priority(&self) -> TaskPriority {
        if self.device_id.is_some() {
            TaskPriority::High
        } else {
            TaskPriority::Normal
        }
    }
}

/// Builder used by the façade and by tests.
#[derive(Debug, Clone)]
pub struct TransportTaskBuilder {
    task: TransportTask,
}

impl TransportTaskBuilder {
    pub fn new(task_id: impl Into<TaskId>, command_type: CommandType) -> Self {
        Self {
            task: TransportTask {
                task_id: task_id.into(),
                command_type,
                device_id: None,
                source_location: None,
                target_location: None,
                gate_number: 0,
                in_dir_block: Direction::Bottom,
                out_dir_block: Direction::Bottom,
            },
        }
    }

    pub fn device(mut self, device_id: impl Into<DeviceId>) -> Self {
        self.task.device_id = Some(device_id.into());
        self
    }

    pub fn source(mut self, location: Location) -> Self {
        self.task.source_location = Some(location);
        self
    }

    pub fn target(mut self, location: Location) -> Self {
        self.task.target_location = Some(location);
        self
    }

    pub fn gate(mut self, gate_number: u16) -> Self {
        self.task.gate_number = gate_number;
        self
    }

    pub fn in_dir(mut self, direction: Direction) -> Self {
        self.task.in_dir_block = direction;
        self
    }

    pub fn out_dir(mut self, direction: Direction) -> Self {
        self.task.out_dir_block = direction;
        self
    }

    pub fn build(self) -> Result<TransportTask> {
        self.task.validate()?;
        Ok(self.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_requires_no_locations() {
        let task = TransportTaskBuilder::new("T1", CommandType::Inbound)
            .gate(1)
            .build()
            .unwrap();
        assert_eq!(task.priority(), TaskPriority::Normal);
    }

    #[test]
    fn test_outbound_requires_source() {
        let missing = TransportTaskBuilder::new("T1", CommandType::Outbound).build();
        assert!(missing.is_err());

        let ok = TransportTaskBuilder::new("T1", CommandType::Outbound)
            .source(Location::new(1, 2, 3))
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_transfer_requires_both_locations() {
        let only_source = TransportTaskBuilder::new("T1", CommandType::Transfer)
            .source(Location::new(1, 1, 1))
            .build();
        assert!(only_source.is_err());

        let both = TransportTaskBuilder::new("T1", CommandType::Transfer)
            .source(Location::new(1, 1, 1))
            .target(Location::new(1, 1, 5))
            .build();
        assert!(both.is_ok());
    }

    #[test]
    fn test_pinned_task_is_high_priority() {
        let task = TransportTaskBuilder::new("T1", CommandType::Inbound)
            .device("SHUTTLE_02")
            .build()
            .unwrap();
        assert_eq!(task.priority(), TaskPriority::High);
    }

    #[test]
    fn test_empty_task_id_rejected() {
        let task = TransportTaskBuilder::new("", CommandType::Inbound).build();
        assert!(task.is_err());
    }
}
