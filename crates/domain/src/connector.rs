//! PLC connector port.
//!
//! The gateway mandates the semantics of the named signals, never their wire
//! encoding. Concrete protocol bindings (S7, Modbus, simulators) implement
//! this trait in the infrastructure layer; one connector instance serializes
//! all I/O for its device.

use crate::shared_kernel::{DeviceId, DeviceProfile, GatewayError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by connector implementations.
#[derive(Error, Debug)]
pub enum PlcError {
    #[error("PLC operation timed out on {address} after {timeout_secs}s")]
    Timeout { address: String, timeout_secs: u64 },

    #[error("PLC connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("PLC type mismatch on {address}: expected {expected}")]
    TypeMismatch { address: String, expected: String },

    #[error("PLC protocol error: {message}")]
    Protocol { message: String },
}

impl PlcError {
    /// Attach the owning device to build the gateway-level error.
    pub fn into_gateway_error(self, device_id: &DeviceId) -> GatewayError {
        match self {
            PlcError::ConnectionFailed { message } => GatewayError::PlcConnectionFailed {
                device_id: device_id.clone(),
                message,
            },
            PlcError::Timeout { .. } => GatewayError::Timeout {
                message: self.to_string(),
            },
            other => GatewayError::ExecutionException {
                message: other.to_string(),
            },
        }
    }
}

pub type PlcResult<T> = std::result::Result<T, PlcError>;

/// Typed read/write access to named PLC addresses of one device.
///
/// Implementations must serialize I/O internally: at most one in-flight
/// request per connector, and every operation bounded by the configured
/// read/write timeout.
#[async_trait]
pub trait PlcConnector: Send + Sync {
    async fn read_bool(&self, address: &str) -> PlcResult<bool>;
    async fn write_bool(&self, address: &str, value: bool) -> PlcResult<()>;

    async fn read_i16(&self, address: &str) -> PlcResult<i16>;
    async fn write_i16(&self, address: &str, value: i16) -> PlcResult<()>;

    async fn read_i32(&self, address: &str) -> PlcResult<i32>;
    async fn write_i32(&self, address: &str, value: i32) -> PlcResult<()>;

    /// Read a character word. PLC string words carry one character each;
    /// an empty result means the word is blank.
    async fn read_string(&self, address: &str) -> PlcResult<String>;
    async fn write_string(&self, address: &str, value: &str) -> PlcResult<()>;

    fn is_connected(&self) -> bool;

    /// Establish the connection if it is not up, retrying per the
    /// configured policy. Exhausted retries yield `ConnectionFailed`.
    async fn ensure_connected(&self) -> PlcResult<()>;

    /// Release the underlying transport. Further I/O fails until
    /// `ensure_connected` succeeds again.
    async fn disconnect(&self);
}

/// Creates connectors for the pool, one per device.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    async fn create(&self, profile: &DeviceProfile) -> PlcResult<Arc<dyn PlcConnector>>;
}
