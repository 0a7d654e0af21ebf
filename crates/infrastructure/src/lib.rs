//! Infrastructure adapters for the shuttle gateway.
//!
//! Implements the domain ports: an in-process event bus over a broadcast
//! channel, the per-device connection pool with single-flight creation, and
//! the in-memory PLC connector used in test mode and by the test suites.

pub mod event_bus;
pub mod plc;
pub mod pool;

pub use event_bus::{EventBusConfig, InMemoryEventBus};
pub use plc::in_memory::{InMemoryConnectorFactory, InMemoryPlcConnector};
pub use pool::ConnectionPool;
