//! Configuration module for the shuttle gateway
//!
//! This module provides the configuration DTOs, an environment-variable
//! loader and the validation logic used at gateway construction.
//!
//! # Architecture
//!
//! 1. **Single Source of Truth**: configuration is assembled once at startup
//!    and passed to services via dependency injection.
//! 2. **Fail Fast**: invalid configuration is rejected at construction, no
//!    silent fallbacks.
//! 3. **DTO Pattern**: the DTOs are plain immutable data with serde derives;
//!    how they are produced (env, files, host software) is a caller concern.
//!
//! # Environment Variables
//!
//! All variables are optional overrides on top of a base configuration:
//!
//! - `SHUTTLE_MODE`: `"production"` or anything else for test mode
//! - `SHUTTLE_MAX_QUEUE_SIZE`, `SHUTTLE_MAX_TASKS_PER_CYCLE`
//! - `SHUTTLE_AUTO_PAUSE_WHEN_EMPTY`
//! - `SHUTTLE_VALIDATION_TIMEOUT_MINUTES`
//! - `SHUTTLE_PLC_READ_TIMEOUT_SECS`, `SHUTTLE_PLC_WRITE_TIMEOUT_SECS`
//! - `SHUTTLE_LOG_LEVEL`

pub mod dto;
pub mod error;
pub mod loader;
pub mod validator;

pub use dto::{
    BarcodeHandlerConfig, DeviceMonitorConfig, GatewayConfig, GatewayMode, LoggerConfig,
    PlcConfig, TaskDispatcherConfig, TaskTimeoutConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validator::validate_gateway_config;
