//! Configuration validation

use super::dto::GatewayConfig;
use super::error::{ConfigError, ConfigResult};
use std::collections::HashSet;

/// Validate a fully assembled gateway configuration.
///
/// Rejects empty fleets, duplicate or empty device ids, malformed signal
/// maps and zeroed timeouts. Called once at gateway construction.
pub fn validate_gateway_config(config: &GatewayConfig) -> ConfigResult<()> {
    if config.devices.is_empty() {
        return Err(ConfigError::Validation(
            "device list must not be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for device in &config.devices {
        if device.id.is_empty() {
            return Err(ConfigError::Validation(
                "device id must not be empty".to_string(),
            ));
        }
        if !seen.insert(device.id.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate device id: {}",
                device.id
            )));
        }
        if device.endpoint(config.mode).trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "device {} has no endpoint for mode {:?}",
                device.id, config.mode
            )));
        }
        device
            .signals
            .validate(config.barcode_handler.max_barcode_length)
            .map_err(|e| ConfigError::Validation(format!("device {}: {}", device.id, e)))?;
    }

    if config.task_dispatcher.max_queue_size == 0 {
        return Err(ConfigError::Validation(
            "task_dispatcher.max_queue_size must be positive".to_string(),
        ));
    }
    if config.task_dispatcher.max_tasks_per_cycle == 0 {
        return Err(ConfigError::Validation(
            "task_dispatcher.max_tasks_per_cycle must be positive".to_string(),
        ));
    }
    if config.device_monitor.max_concurrent_operations == 0 {
        return Err(ConfigError::Validation(
            "device_monitor.max_concurrent_operations must be positive".to_string(),
        ));
    }
    if config.barcode_handler.validation_timeout_minutes == 0 {
        return Err(ConfigError::Validation(
            "barcode_handler.validation_timeout_minutes must be positive".to_string(),
        ));
    }
    if config.plc.read_timeout_seconds == 0 || config.plc.write_timeout_seconds == 0 {
        return Err(ConfigError::Validation(
            "plc timeouts must be positive".to_string(),
        ));
    }
    if config.task_timeout.inbound_timeout_minutes == 0
        || config.task_timeout.outbound_timeout_minutes == 0
        || config.task_timeout.transfer_timeout_minutes == 0
    {
        return Err(ConfigError::Validation(
            "task timeouts must be positive".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::dto::GatewayMode;
    use crate::devices::{DeviceProfile, SignalMap};
    use crate::ids::DeviceId;

    fn profile(id: &str) -> DeviceProfile {
        DeviceProfile {
            id: DeviceId::from(id),
            production_endpoint: "10.0.0.10:102".to_string(),
            test_endpoint: "127.0.0.1:9102".to_string(),
            cpu_type: "S7-1500".to_string(),
            rack: 0,
            slot: 1,
            signals: SignalMap::for_data_block("DB66"),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        let config =
            GatewayConfig::for_devices(GatewayMode::Test, vec![profile("A"), profile("B")]);
        assert!(validate_gateway_config(&config).is_ok());
    }

    #[test]
    fn test_empty_fleet_rejected() {
        let config = GatewayConfig::for_devices(GatewayMode::Test, vec![]);
        assert!(validate_gateway_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_device_id_rejected() {
        let config =
            GatewayConfig::for_devices(GatewayMode::Test, vec![profile("A"), profile("A")]);
        let err = validate_gateway_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate device id"));
    }

    #[test]
    fn test_zero_queue_size_rejected() {
        let mut config = GatewayConfig::for_devices(GatewayMode::Test, vec![profile("A")]);
        config.task_dispatcher.max_queue_size = 0;
        assert!(validate_gateway_config(&config).is_err());
    }
}
