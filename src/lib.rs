//! Warehouse automation gateway between host software and PLC-driven
//! shuttle fleets.
//!
//! The [`Gateway`] façade wires the connection pool, device monitor, task
//! dispatcher, command executor and barcode validator together and exposes
//! the operational API. Everything underneath is instance-based; embedding
//! processes decide whether to hold it as a singleton.

pub mod gateway;

pub use gateway::Gateway;
pub use shuttle_application::{BarcodeRequest, TaskAssignment};
pub use shuttle_domain::connector::{ConnectorFactory, PlcConnector};
pub use shuttle_domain::events::GatewayEvent;
pub use shuttle_domain::tasks::{TransportTask, TransportTaskBuilder};
pub use shuttle_domain::DeviceInfo;
pub use shuttle_infrastructure::{InMemoryConnectorFactory, InMemoryPlcConnector};
pub use shuttle_shared::config::{GatewayConfig, GatewayMode};
pub use shuttle_shared::{
    CommandType, DeviceId, DeviceProfile, DeviceStatus, Direction, ErrorDetail, GatewayError,
    Location, SignalMap, TaskId, TaskPriority,
};
