//! Configuration loader
//!
//! Applies `.env` file and environment-variable overrides on top of a base
//! configuration. The base (device profiles included) comes from the host
//! integration; this loader only adjusts tuning knobs.

use super::dto::{GatewayConfig, GatewayMode};
use super::error::{ConfigError, ConfigResult};
use super::validator::validate_gateway_config;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration loader
///
/// # Priority
///
/// Values from the `.env` file take precedence over the process environment,
/// which in turn takes precedence over the base configuration.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Optional path to .env file
    env_file_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new(env_file_path: Option<PathBuf>) -> Self {
        Self { env_file_path }
    }

    /// Load the gateway configuration.
    ///
    /// Reads the optional `.env` file, applies environment overrides to the
    /// base configuration and validates the result.
    pub fn load_gateway_config(&self, base: GatewayConfig) -> ConfigResult<GatewayConfig> {
        if let Some(path) = &self.env_file_path {
            dotenv::from_path(path).map_err(|source| ConfigError::EnvFileLoad {
                path: path.clone(),
                source,
            })?;
        }

        let mut config = base;

        if let Ok(mode) = std::env::var("SHUTTLE_MODE") {
            config.mode = GatewayMode::parse(&mode);
        }
        if let Some(v) = read_env("SHUTTLE_MAX_QUEUE_SIZE")? {
            config.task_dispatcher.max_queue_size = v;
        }
        if let Some(v) = read_env("SHUTTLE_MAX_TASKS_PER_CYCLE")? {
            config.task_dispatcher.max_tasks_per_cycle = v;
        }
        if let Some(v) = read_env("SHUTTLE_AUTO_PAUSE_WHEN_EMPTY")? {
            config.task_dispatcher.auto_pause_when_empty = v;
        }
        if let Some(v) = read_env("SHUTTLE_VALIDATION_TIMEOUT_MINUTES")? {
            config.barcode_handler.validation_timeout_minutes = v;
        }
        if let Some(v) = read_env("SHUTTLE_PLC_READ_TIMEOUT_SECS")? {
            config.plc.read_timeout_seconds = v;
        }
        if let Some(v) = read_env("SHUTTLE_PLC_WRITE_TIMEOUT_SECS")? {
            config.plc.write_timeout_seconds = v;
        }
        if let Ok(level) = std::env::var("SHUTTLE_LOG_LEVEL") {
            config.logger.level = level;
        }

        validate_gateway_config(&config)?;
        Ok(config)
    }
}

fn read_env<T: FromStr>(var: &str) -> ConfigResult<Option<T>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
