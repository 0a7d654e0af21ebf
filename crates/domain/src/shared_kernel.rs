pub use shuttle_shared::*;

pub use shuttle_shared::config::{GatewayConfig, GatewayMode};
pub use shuttle_shared::error::codes;
