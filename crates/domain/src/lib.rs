//! Domain model of the shuttle gateway.
//!
//! Holds the transport-task aggregate, the priority queue, device snapshots,
//! the PLC connector port, the assignment strategies and the event model.
//! All I/O is behind ports; implementations live in the infrastructure
//! crate.

pub mod connector;
pub mod devices;
pub mod event_bus;
pub mod events;
pub mod scheduling;
pub mod shared_kernel;
pub mod tasks;

pub use connector::{ConnectorFactory, PlcConnector, PlcError};
pub use devices::DeviceInfo;
pub use event_bus::{EventBusError, EventPublisher};
pub use events::GatewayEvent;
pub use scheduling::{AssignmentContext, AssignmentStrategy, PinnedOrNearestStrategy};
pub use shared_kernel::*;
pub use tasks::queue::{PriorityTaskQueue, QueueEntry};
pub use tasks::TransportTask;
