//! Configuration Data Transfer Objects (DTOs)
//!
//! Immutable configuration passed to every component of the gateway at
//! construction. Defaults carry the values agreed with the PLC programs.

use crate::devices::DeviceProfile;
use crate::states::CommandType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Operating mode of the gateway.
///
/// Anything that is not the literal string `"production"` parses to `Test`;
/// test mode selects the device test endpoints and unlocks `reset_system`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayMode {
    Production,
    Test,
}

impl GatewayMode {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("production") {
            GatewayMode::Production
        } else {
            GatewayMode::Test
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, GatewayMode::Test)
    }
}

/// Root configuration DTO for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub devices: Vec<DeviceProfile>,
    pub device_monitor: DeviceMonitorConfig,
    pub barcode_handler: BarcodeHandlerConfig,
    pub task_dispatcher: TaskDispatcherConfig,
    pub task_timeout: TaskTimeoutConfig,
    pub plc: PlcConfig,
    pub logger: LoggerConfig,
}

impl GatewayConfig {
    /// Configuration with all defaults for the given mode and fleet.
    pub fn for_devices(mode: GatewayMode, devices: Vec<DeviceProfile>) -> Self {
        Self {
            mode,
            devices,
            device_monitor: DeviceMonitorConfig::default(),
            barcode_handler: BarcodeHandlerConfig::default(),
            task_dispatcher: TaskDispatcherConfig::default(),
            task_timeout: TaskTimeoutConfig::default(),
            plc: PlcConfig::default(),
            logger: LoggerConfig::default(),
        }
    }
}

/// Device monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMonitorConfig {
    /// Concurrency cap for fleet-wide PLC fan-out (idle discovery).
    pub max_concurrent_operations: usize,
    /// Address prefix a device must stay inside for `reset_system`.
    pub safety_scope_prefix: String,
}

impl Default for DeviceMonitorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 10,
            safety_scope_prefix: "DB66".to_string(),
        }
    }
}

/// Barcode validation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarcodeHandlerConfig {
    pub validation_timeout_minutes: u64,
    pub max_barcode_length: usize,
}

impl BarcodeHandlerConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_minutes * 60)
    }
}

impl Default for BarcodeHandlerConfig {
    fn default() -> Self {
        Self {
            validation_timeout_minutes: 2,
            max_barcode_length: 10,
        }
    }
}

/// Task dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDispatcherConfig {
    pub max_tasks_per_cycle: usize,
    pub max_queue_size: usize,
    pub auto_pause_when_empty: bool,
    /// Delay between two assignments in one processing pass, rate-limiting
    /// PLC trigger bursts.
    pub assignment_delay_seconds: u64,
}

impl TaskDispatcherConfig {
    pub fn assignment_delay(&self) -> Duration {
        Duration::from_secs(self.assignment_delay_seconds)
    }
}

impl Default for TaskDispatcherConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_cycle: 10,
            max_queue_size: 50,
            auto_pause_when_empty: true,
            assignment_delay_seconds: 1,
        }
    }
}

/// Per-command-type polling timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTimeoutConfig {
    pub inbound_timeout_minutes: u64,
    pub outbound_timeout_minutes: u64,
    pub transfer_timeout_minutes: u64,
}

impl TaskTimeoutConfig {
    pub fn minutes_for(&self, command_type: CommandType) -> u64 {
        match command_type {
            CommandType::Inbound => self.inbound_timeout_minutes,
            CommandType::Outbound => self.outbound_timeout_minutes,
            CommandType::Transfer => self.transfer_timeout_minutes,
        }
    }

    pub fn timeout_for(&self, command_type: CommandType) -> Duration {
        Duration::from_secs(self.minutes_for(command_type) * 60)
    }
}

impl Default for TaskTimeoutConfig {
    fn default() -> Self {
        Self {
            inbound_timeout_minutes: 15,
            outbound_timeout_minutes: 15,
            transfer_timeout_minutes: 15,
        }
    }
}

/// PLC connector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub max_connection_retries: u32,
    pub retry_delay_seconds: u64,
}

impl PlcConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            read_timeout_seconds: 10,
            write_timeout_seconds: 10,
            max_connection_retries: 5,
            retry_delay_seconds: 2,
        }
    }
}

/// Logging backend selection and verbosity.
///
/// The gateway core only initializes `tracing`; concrete sinks (file,
/// console) are wired by the embedding process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub backend: String,
    pub level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            backend: "console".to_string(),
            level: "info".to_string(),
        }
    }
}
