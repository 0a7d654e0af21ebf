//! Application services of the shuttle gateway.
//!
//! The task dispatcher, the device monitor, the per-command-type PLC state
//! machines, the command executor and the barcode validator. Wiring between
//! them is done by the gateway façade.

pub mod barcode;
pub mod commands;
pub mod dispatcher;
pub mod executor;
pub mod monitor;

pub use barcode::{BarcodeRequest, BarcodeValidator};
pub use commands::{CommandContext, CommandStrategy, OutcomeReporter};
pub use dispatcher::{TaskAssignment, TaskDispatcher};
pub use executor::CommandExecutor;
pub use monitor::DeviceMonitor;
