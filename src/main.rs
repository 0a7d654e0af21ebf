// Binary entrypoint for the shuttle gateway.
// Compile: cargo build --bin shuttle-gateway
// Run: cargo run --bin shuttle-gateway

use shuttle_gateway::{DeviceId, DeviceProfile, Gateway, GatewayConfig, GatewayMode, SignalMap};
use shuttle_infrastructure::InMemoryConnectorFactory;
use shuttle_shared::config::ConfigLoader;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Device profiles come from the host integration; this standalone
    // binary runs a single simulated shuttle in test mode.
    let demo_device = DeviceProfile {
        id: DeviceId::from("SHUTTLE_01"),
        production_endpoint: "10.0.0.10:102".to_string(),
        test_endpoint: "127.0.0.1:9102".to_string(),
        cpu_type: "S7-1500".to_string(),
        rack: 0,
        slot: 1,
        signals: SignalMap::for_data_block("DB66"),
    };
    let base = GatewayConfig::for_devices(GatewayMode::Test, vec![demo_device]);
    let config = ConfigLoader::new(None).load_gateway_config(base)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logger.level)),
        )
        .init();

    info!("starting shuttle gateway");
    let factory = Arc::new(InMemoryConnectorFactory::new(config.plc.clone()));
    let gateway = Gateway::new(config.clone(), factory)?;

    for device in &config.devices {
        match gateway.activate_device(&device.id).await {
            Ok(status) => info!(device_id = %device.id, %status, "device activated"),
            Err(err) => warn!(device_id = %device.id, error = %err, "device activation failed"),
        }
    }

    tokio::signal::ctrl_c().await?;
    gateway.shutdown().await;
    info!("shuttle gateway stopped");
    Ok(())
}
