//! Shared kernel for the shuttle gateway.
//!
//! Everything in this crate is pure data: identifiers, state enums, the
//! wire-visible error model and the configuration DTOs. No I/O lives here.

pub mod config;
pub mod devices;
pub mod error;
pub mod ids;
pub mod location;
pub mod states;

pub use devices::{DeviceProfile, SignalMap};
pub use error::{ErrorDetail, GatewayError, Result};
pub use ids::{DeviceId, TaskId};
pub use location::Location;
pub use states::{CommandType, DeviceStatus, Direction, DispatcherState, TaskPriority};
