use crate::config::GatewayMode;
use crate::error::{GatewayError, Result};
use crate::ids::DeviceId;
use serde::{Deserialize, Serialize};

/// Named PLC addresses of one shuttle device.
///
/// Addresses are symbolic strings (e.g. `"DB66.DBX0.0"`, `"DB66.DBW4"`);
/// the connector resolves them to its protocol. The gateway only mandates
/// the semantics of these signals, never their encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMap {
    // Command bits written by the gateway
    pub inbound_command: String,
    pub outbound_command: String,
    pub transfer_command: String,
    pub start_process_command: String,
    pub cancel_command: String,

    // Status bits reported by the device
    pub command_acknowledged: String,
    pub command_rejected: String,
    pub alarm: String,
    pub inbound_complete: String,
    pub outbound_complete: String,
    pub transfer_complete: String,
    pub device_ready: String,
    pub connected_to_software: String,

    // Barcode validation verdict bits
    pub barcode_valid: String,
    pub barcode_invalid: String,

    // Direction bits (Bottom=false, Top=true on the wire)
    pub in_dir_block: String,
    pub out_dir_block: String,

    // Data words
    pub gate_number: String,
    pub error_code: String,
    pub source_floor: String,
    pub source_rail: String,
    pub source_block: String,
    pub target_floor: String,
    pub target_rail: String,
    pub target_block: String,
    pub actual_floor: String,
    pub actual_rail: String,
    pub actual_block: String,

    /// One word per barcode character, read in order.
    pub barcode_words: Vec<String>,
}

impl SignalMap {
    /// Canonical layout for a device whose signals live in one data block.
    ///
    /// Used by tests and by sites that follow the standard DB layout; sites
    /// with a custom layout configure each address individually.
    pub fn for_data_block(db: &str) -> Self {
        Self {
            inbound_command: format!("{}.DBX0.0", db),
            outbound_command: format!("{}.DBX0.1", db),
            transfer_command: format!("{}.DBX0.2", db),
            start_process_command: format!("{}.DBX0.3", db),
            cancel_command: format!("{}.DBX0.4", db),
            command_acknowledged: format!("{}.DBX0.5", db),
            command_rejected: format!("{}.DBX0.6", db),
            alarm: format!("{}.DBX0.7", db),
            inbound_complete: format!("{}.DBX1.0", db),
            outbound_complete: format!("{}.DBX1.1", db),
            transfer_complete: format!("{}.DBX1.2", db),
            device_ready: format!("{}.DBX1.3", db),
            connected_to_software: format!("{}.DBX1.4", db),
            barcode_valid: format!("{}.DBX1.5", db),
            barcode_invalid: format!("{}.DBX1.6", db),
            in_dir_block: format!("{}.DBX1.7", db),
            out_dir_block: format!("{}.DBX2.0", db),
            gate_number: format!("{}.DBW4", db),
            error_code: format!("{}.DBW6", db),
            source_floor: format!("{}.DBW8", db),
            source_rail: format!("{}.DBW10", db),
            source_block: format!("{}.DBW12", db),
            target_floor: format!("{}.DBW14", db),
            target_rail: format!("{}.DBW16", db),
            target_block: format!("{}.DBW18", db),
            actual_floor: format!("{}.DBW20", db),
            actual_rail: format!("{}.DBW22", db),
            actual_block: format!("{}.DBW24", db),
            barcode_words: (0..10).map(|i| format!("{}.DBW{}", db, 26 + i * 2)).collect(),
        }
    }

    /// Every address in the map, barcode words included.
    pub fn all_addresses(&self) -> Vec<&str> {
        let mut addrs: Vec<&str> = vec![
            &self.inbound_command,
            &self.outbound_command,
            &self.transfer_command,
            &self.start_process_command,
            &self.cancel_command,
            &self.command_acknowledged,
            &self.command_rejected,
            &self.alarm,
            &self.inbound_complete,
            &self.outbound_complete,
            &self.transfer_complete,
            &self.device_ready,
            &self.connected_to_software,
            &self.barcode_valid,
            &self.barcode_invalid,
            &self.in_dir_block,
            &self.out_dir_block,
            &self.gate_number,
            &self.error_code,
            &self.source_floor,
            &self.source_rail,
            &self.source_block,
            &self.target_floor,
            &self.target_rail,
            &self.target_block,
            &self.actual_floor,
            &self.actual_rail,
            &self.actual_block,
        ];
        addrs.extend(self.barcode_words.iter().map(String::as_str));
        addrs
    }

    /// Bit addresses that a full system reset clears to `false`.
    pub fn resettable_bits(&self) -> Vec<&str> {
        vec![
            &self.inbound_command,
            &self.outbound_command,
            &self.transfer_command,
            &self.start_process_command,
            &self.cancel_command,
            &self.command_acknowledged,
            &self.command_rejected,
            &self.alarm,
            &self.inbound_complete,
            &self.outbound_complete,
            &self.transfer_complete,
            &self.barcode_valid,
            &self.barcode_invalid,
            &self.in_dir_block,
            &self.out_dir_block,
        ]
    }

    /// Word addresses that a full system reset clears to `0`.
    pub fn resettable_words(&self) -> Vec<&str> {
        vec![
            &self.gate_number,
            &self.error_code,
            &self.source_floor,
            &self.source_rail,
            &self.source_block,
            &self.target_floor,
            &self.target_rail,
            &self.target_block,
            &self.actual_floor,
            &self.actual_rail,
            &self.actual_block,
        ]
    }

    /// True when every address sits inside the given safety scope prefix.
    pub fn all_within_scope(&self, prefix: &str) -> bool {
        self.all_addresses().iter().all(|a| a.starts_with(prefix))
    }

    /// Structural validation at configuration time.
    pub fn validate(&self, expected_barcode_words: usize) -> Result<()> {
        if self.all_addresses().iter().any(|a| a.trim().is_empty()) {
            return Err(GatewayError::ValidationException {
                message: "signal map contains an empty address".to_string(),
            });
        }
        if self.barcode_words.len() != expected_barcode_words {
            return Err(GatewayError::ValidationException {
                message: format!(
                    "signal map must define {} barcode words, found {}",
                    expected_barcode_words,
                    self.barcode_words.len()
                ),
            });
        }
        Ok(())
    }
}

/// Static description of one shuttle device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: DeviceId,
    pub production_endpoint: String,
    pub test_endpoint: String,
    pub cpu_type: String,
    pub rack: u16,
    pub slot: u16,
    pub signals: SignalMap,
}

impl DeviceProfile {
    /// Endpoint to dial for the configured gateway mode.
    pub fn endpoint(&self, mode: GatewayMode) -> &str {
        match mode {
            GatewayMode::Production => &self.production_endpoint,
            GatewayMode::Test => &self.test_endpoint,
        }
    }
}
