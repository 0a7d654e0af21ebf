//! PLC connector implementations.
//!
//! Production protocol bindings (S7, Modbus) live behind the same
//! [`shuttle_domain::connector::PlcConnector`] port as the in-memory
//! connector shipped here; the gateway core never sees the difference.

pub mod in_memory;
