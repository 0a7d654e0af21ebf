//! Device monitor
//!
//! Tracks per-device status, reads readiness and location from the PLC and
//! emits `DeviceStatusChanged` on every transition. Fleet-wide fan-out is
//! capped by `device_monitor.max_concurrent_operations`.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use shuttle_domain::devices::DeviceInfo;
use shuttle_domain::event_bus::EventPublisher;
use shuttle_domain::events::GatewayEvent;
use shuttle_domain::shared_kernel::{
    DeviceId, DeviceStatus, GatewayError, GatewayMode, Location, Result,
};
use shuttle_infrastructure::pool::ConnectionPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use shuttle_shared::config::DeviceMonitorConfig;

pub struct DeviceMonitor {
    pool: Arc<ConnectionPool>,
    events: Arc<dyn EventPublisher>,
    /// Per-monitor status lock: transitions and their event emissions are
    /// serialized through this mutex.
    statuses: Mutex<HashMap<DeviceId, DeviceStatus>>,
    config: DeviceMonitorConfig,
    mode: GatewayMode,
}

impl DeviceMonitor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        events: Arc<dyn EventPublisher>,
        config: DeviceMonitorConfig,
        mode: GatewayMode,
    ) -> Self {
        Self {
            pool,
            events,
            statuses: Mutex::new(HashMap::new()),
            config,
            mode,
        }
    }

    /// Bring a device under monitoring.
    ///
    /// Reads `device_ready` once: `true` maps to Idle, `false` to Busy. Any
    /// failure leaves the device Offline and surfaces the error.
    pub async fn start_monitoring(&self, device_id: &DeviceId) -> Result<DeviceStatus> {
        let profile = self.pool.profile(device_id)?.clone();
        let ready = async {
            let connector = self.pool.get(device_id).await?;
            connector
                .ensure_connected()
                .await
                .map_err(|e| e.into_gateway_error(device_id))?;
            connector
                .read_bool(&profile.signals.device_ready)
                .await
                .map_err(|e| e.into_gateway_error(device_id))
        }
        .await;

        match ready {
            Ok(true) => {
                self.update_device_status(device_id, DeviceStatus::Idle).await;
                Ok(DeviceStatus::Idle)
            }
            Ok(false) => {
                self.update_device_status(device_id, DeviceStatus::Busy).await;
                Ok(DeviceStatus::Busy)
            }
            Err(err) => {
                warn!(device_id = %device_id, error = %err, "start_monitoring failed");
                self.update_device_status(device_id, DeviceStatus::Offline)
                    .await;
                Err(err)
            }
        }
    }

    /// Stop monitoring: release the connector and forget the status.
    pub async fn stop_monitoring(&self, device_id: &DeviceId) {
        self.pool.remove(device_id).await;
        self.statuses.lock().await.remove(device_id);
        info!(device_id = %device_id, "device removed from monitoring");
    }

    /// Current status; Offline when the device was never monitored.
    pub async fn get_device_status(&self, device_id: &DeviceId) -> DeviceStatus {
        self.statuses
            .lock()
            .await
            .get(device_id)
            .copied()
            .unwrap_or_default()
    }

    /// Compare-and-set of the in-memory status. Emits
    /// `DeviceStatusChanged` only when the value actually changed.
    pub async fn update_device_status(&self, device_id: &DeviceId, new_status: DeviceStatus) {
        let mut statuses = self.statuses.lock().await;
        let previous = statuses
            .insert(device_id.clone(), new_status)
            .unwrap_or_default();
        if previous == new_status {
            return;
        }
        debug!(device_id = %device_id, from = %previous, to = %new_status, "device status changed");
        let event = GatewayEvent::DeviceStatusChanged {
            device_id: device_id.clone(),
            new_status,
            previous_status: previous,
            occurred_at: Utc::now(),
        };
        // Held lock keeps status-change events in transition order.
        if let Err(err) = self.events.publish(&event).await {
            warn!(device_id = %device_id, error = %err, "failed to publish status change");
        }
    }

    /// Reset a faulted device back to Idle.
    ///
    /// Succeeds only when the device is not Busy, the PLC `alarm` bit is
    /// clear and `error_code` is zero. Only the in-memory status flips; the
    /// PLC error word is left for the device to clear.
    pub async fn reset_device_status(&self, device_id: &DeviceId) -> Result<bool> {
        let current = self.get_device_status(device_id).await;
        if current.is_working() {
            return Ok(false);
        }
        let signals = self.pool.profile(device_id)?.signals.clone();
        let connector = self.pool.get(device_id).await?;

        let alarm = connector
            .read_bool(&signals.alarm)
            .await
            .map_err(|e| e.into_gateway_error(device_id))?;
        let error_code = connector
            .read_i16(&signals.error_code)
            .await
            .map_err(|e| e.into_gateway_error(device_id))?;

        if alarm || error_code != 0 {
            debug!(device_id = %device_id, alarm, error_code, "reset refused");
            return Ok(false);
        }
        self.update_device_status(device_id, DeviceStatus::Idle).await;
        Ok(true)
    }

    /// Snapshot of idle devices across the fleet.
    ///
    /// A device counts as idle iff `command_acknowledged` is false and its
    /// actual location reads successfully. Statuses are updated as a side
    /// effect; unreachable devices go Offline.
    pub async fn get_idle_devices(&self) -> Vec<DeviceInfo> {
        let device_ids: Vec<DeviceId> = self.pool.profiles().keys().cloned().collect();
        let snapshots = stream::iter(device_ids)
            .map(|device_id| async move {
                let status = self.probe_device(&device_id).await;
                (device_id, status)
            })
            .buffer_unordered(self.config.max_concurrent_operations)
            .collect::<Vec<_>>()
            .await;

        let mut idle = Vec::new();
        for (device_id, probe) in snapshots {
            match probe {
                Ok(Some(location)) => {
                    self.update_device_status(&device_id, DeviceStatus::Idle).await;
                    idle.push(DeviceInfo::new(device_id, DeviceStatus::Idle, Some(location)));
                }
                Ok(None) => {
                    self.update_device_status(&device_id, DeviceStatus::Busy).await;
                }
                Err(err) => {
                    debug!(device_id = %device_id, error = %err, "idle probe failed");
                    self.update_device_status(&device_id, DeviceStatus::Offline)
                        .await;
                }
            }
        }
        idle
    }

    /// One idle probe: `Ok(Some(location))` when idle, `Ok(None)` when the
    /// device has acknowledged a command, `Err` when unreachable.
    async fn probe_device(&self, device_id: &DeviceId) -> Result<Option<Location>> {
        let signals = self.pool.profile(device_id)?.signals.clone();
        let connector = self.pool.get(device_id).await?;
        let acknowledged = connector
            .read_bool(&signals.command_acknowledged)
            .await
            .map_err(|e| e.into_gateway_error(device_id))?;
        if acknowledged {
            return Ok(None);
        }
        match self.read_location(device_id).await {
            Some(location) => Ok(Some(location)),
            None => Err(GatewayError::ExecutionException {
                message: format!("device {} location read failed", device_id),
            }),
        }
    }

    /// Actual device location; None when any coordinate read fails.
    pub async fn get_current_location(&self, device_id: &DeviceId) -> Option<Location> {
        self.read_location(device_id).await
    }

    async fn read_location(&self, device_id: &DeviceId) -> Option<Location> {
        let signals = self.pool.profile(device_id).ok()?.signals.clone();
        let connector = self.pool.get(device_id).await.ok()?;
        let (floor, rail, block) = tokio::join!(
            connector.read_i16(&signals.actual_floor),
            connector.read_i16(&signals.actual_rail),
            connector.read_i16(&signals.actual_block),
        );
        match (floor, rail, block) {
            (Ok(floor), Ok(rail), Ok(block)) => Some(Location::new(floor, rail, block)),
            _ => None,
        }
    }

    /// Test-mode-only full reset of the device's data block.
    ///
    /// Refused outside test mode and for devices whose signal map leaves
    /// the configured safety scope. Writes zeroes to every command, status,
    /// location, barcode, direction, gate and error field, then sets Idle.
    pub async fn reset_system(&self, device_id: &DeviceId) -> Result<()> {
        if !self.mode.is_test() {
            return Err(GatewayError::InvalidOperation {
                message: "reset_system is only available in test mode".to_string(),
            });
        }
        let signals = self.pool.profile(device_id)?.signals.clone();
        if !signals.all_within_scope(&self.config.safety_scope_prefix) {
            return Err(GatewayError::ValidationException {
                message: format!(
                    "device {} has signals outside safety scope {}",
                    device_id, self.config.safety_scope_prefix
                ),
            });
        }
        let connector = self.pool.get(device_id).await?;
        for address in signals.resettable_bits() {
            connector
                .write_bool(address, false)
                .await
                .map_err(|e| e.into_gateway_error(device_id))?;
        }
        for address in signals.resettable_words() {
            connector
                .write_i16(address, 0)
                .await
                .map_err(|e| e.into_gateway_error(device_id))?;
        }
        for address in &signals.barcode_words {
            connector
                .write_string(address, "0")
                .await
                .map_err(|e| e.into_gateway_error(device_id))?;
        }
        self.update_device_status(device_id, DeviceStatus::Idle).await;
        info!(device_id = %device_id, "system reset completed");
        Ok(())
    }

    /// Device-is-known check used by the façade.
    pub fn is_registered(&self, device_id: &DeviceId) -> bool {
        self.pool.profiles().contains_key(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_infrastructure::event_bus::InMemoryEventBus;
    use shuttle_infrastructure::plc::in_memory::InMemoryConnectorFactory;
    use shuttle_shared::config::PlcConfig;
    use shuttle_shared::devices::{DeviceProfile, SignalMap};

    fn profile(id: &str) -> DeviceProfile {
        DeviceProfile {
            id: DeviceId::from(id),
            production_endpoint: "10.0.0.10:102".to_string(),
            test_endpoint: "127.0.0.1:9102".to_string(),
            cpu_type: "S7-1500".to_string(),
            rack: 0,
            slot: 1,
            signals: SignalMap::for_data_block("DB66"),
        }
    }

    struct Fixture {
        factory: Arc<InMemoryConnectorFactory>,
        bus: Arc<InMemoryEventBus>,
        monitor: DeviceMonitor,
    }

    fn fixture(ids: &[&str], mode: GatewayMode) -> Fixture {
        let factory = Arc::new(InMemoryConnectorFactory::new(PlcConfig::default()));
        let pool = Arc::new(ConnectionPool::new(
            factory.clone(),
            ids.iter().map(|id| profile(id)).collect(),
        ));
        let bus = Arc::new(InMemoryEventBus::new(None));
        let monitor = DeviceMonitor::new(
            pool,
            bus.clone(),
            DeviceMonitorConfig::default(),
            mode,
        );
        Fixture {
            factory,
            bus,
            monitor,
        }
    }

    #[tokio::test]
    async fn test_unknown_device_defaults_to_offline() {
        let f = fixture(&["D1"], GatewayMode::Test);
        assert_eq!(
            f.monitor.get_device_status(&DeviceId::from("D1")).await,
            DeviceStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_start_monitoring_reads_readiness() {
        let f = fixture(&["D1"], GatewayMode::Test);
        let id = DeviceId::from("D1");
        let signals = SignalMap::for_data_block("DB66");

        f.factory.handle(&id).set_bool(&signals.device_ready, true);
        assert_eq!(
            f.monitor.start_monitoring(&id).await.unwrap(),
            DeviceStatus::Idle
        );

        f.factory.handle(&id).set_bool(&signals.device_ready, false);
        assert_eq!(
            f.monitor.start_monitoring(&id).await.unwrap(),
            DeviceStatus::Busy
        );
    }

    #[tokio::test]
    async fn test_status_change_emits_event_once() {
        let f = fixture(&["D1"], GatewayMode::Test);
        let id = DeviceId::from("D1");
        let mut rx = f.bus.subscribe_all();

        f.monitor.update_device_status(&id, DeviceStatus::Idle).await;
        // Same value again: no second event.
        f.monitor.update_device_status(&id, DeviceStatus::Idle).await;
        f.monitor.update_device_status(&id, DeviceStatus::Busy).await;

        match rx.recv().await.unwrap() {
            GatewayEvent::DeviceStatusChanged {
                new_status,
                previous_status,
                ..
            } => {
                assert_eq!(new_status, DeviceStatus::Idle);
                assert_eq!(previous_status, DeviceStatus::Offline);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            GatewayEvent::DeviceStatusChanged { new_status, .. } => {
                assert_eq!(new_status, DeviceStatus::Busy);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_idle_discovery_filters_acknowledged_devices() {
        let f = fixture(&["D1", "D2"], GatewayMode::Test);
        let signals = SignalMap::for_data_block("DB66");

        let d1 = f.factory.handle(&DeviceId::from("D1"));
        d1.set_i16(&signals.actual_floor, 1);
        d1.set_i16(&signals.actual_rail, 2);
        d1.set_i16(&signals.actual_block, 3);

        let d2 = f.factory.handle(&DeviceId::from("D2"));
        d2.set_bool(&signals.command_acknowledged, true);

        let idle = f.monitor.get_idle_devices().await;
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].device_id.as_str(), "D1");
        assert_eq!(idle[0].location, Some(Location::new(1, 2, 3)));

        assert_eq!(
            f.monitor.get_device_status(&DeviceId::from("D2")).await,
            DeviceStatus::Busy
        );
    }

    #[tokio::test]
    async fn test_idle_discovery_marks_unreadable_location_offline() {
        let f = fixture(&["D1"], GatewayMode::Test);
        let id = DeviceId::from("D1");
        let signals = SignalMap::for_data_block("DB66");
        f.factory.handle(&id).fail_address(&signals.actual_rail);

        let idle = f.monitor.get_idle_devices().await;
        assert!(idle.is_empty());
        assert_eq!(
            f.monitor.get_device_status(&id).await,
            DeviceStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_get_current_location_none_on_partial_failure() {
        let f = fixture(&["D1"], GatewayMode::Test);
        let id = DeviceId::from("D1");
        let signals = SignalMap::for_data_block("DB66");
        let plc = f.factory.handle(&id);
        plc.set_i16(&signals.actual_floor, 2);
        plc.set_i16(&signals.actual_rail, 3);
        plc.set_i16(&signals.actual_block, 5);

        assert_eq!(
            f.monitor.get_current_location(&id).await,
            Some(Location::new(2, 3, 5))
        );

        plc.fail_address(&signals.actual_block);
        assert_eq!(f.monitor.get_current_location(&id).await, None);
    }

    #[tokio::test]
    async fn test_reset_refused_while_busy_or_alarmed() {
        let f = fixture(&["D1"], GatewayMode::Test);
        let id = DeviceId::from("D1");
        let signals = SignalMap::for_data_block("DB66");

        f.monitor.update_device_status(&id, DeviceStatus::Busy).await;
        assert!(!f.monitor.reset_device_status(&id).await.unwrap());

        f.monitor.update_device_status(&id, DeviceStatus::Error).await;
        f.factory.handle(&id).set_bool(&signals.alarm, true);
        assert!(!f.monitor.reset_device_status(&id).await.unwrap());

        f.factory.handle(&id).set_bool(&signals.alarm, false);
        f.factory.handle(&id).set_i16(&signals.error_code, 7);
        assert!(!f.monitor.reset_device_status(&id).await.unwrap());

        f.factory.handle(&id).set_i16(&signals.error_code, 0);
        assert!(f.monitor.reset_device_status(&id).await.unwrap());
        assert_eq!(f.monitor.get_device_status(&id).await, DeviceStatus::Idle);
    }

    #[tokio::test]
    async fn test_reset_system_requires_test_mode() {
        let f = fixture(&["D1"], GatewayMode::Production);
        let err = f
            .monitor
            .reset_system(&DeviceId::from("D1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn test_reset_system_zeroes_the_data_block() {
        let f = fixture(&["D1"], GatewayMode::Test);
        let id = DeviceId::from("D1");
        let signals = SignalMap::for_data_block("DB66");
        let plc = f.factory.handle(&id);
        plc.set_bool(&signals.alarm, true);
        plc.set_i16(&signals.error_code, 9);
        plc.set_string(&signals.barcode_words[0], "A");

        f.monitor.reset_system(&id).await.unwrap();

        assert!(!plc.get_bool(&signals.alarm));
        assert_eq!(plc.get_i16(&signals.error_code), 0);
        assert_eq!(plc.get_string(&signals.barcode_words[0]), "0");
        assert_eq!(f.monitor.get_device_status(&id).await, DeviceStatus::Idle);
    }

    #[tokio::test]
    async fn test_reset_system_refuses_out_of_scope_signals() {
        let factory = Arc::new(InMemoryConnectorFactory::new(PlcConfig::default()));
        let mut out_of_scope = profile("D1");
        out_of_scope.signals.alarm = "DB99.DBX0.7".to_string();
        let pool = Arc::new(ConnectionPool::new(factory, vec![out_of_scope]));
        let bus = Arc::new(InMemoryEventBus::new(None));
        let monitor = DeviceMonitor::new(
            pool,
            bus,
            DeviceMonitorConfig::default(),
            GatewayMode::Test,
        );

        let err = monitor
            .reset_system(&DeviceId::from("D1"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ValidationException { .. }));
    }

    #[tokio::test]
    async fn test_stop_monitoring_clears_state() {
        let f = fixture(&["D1"], GatewayMode::Test);
        let id = DeviceId::from("D1");
        f.monitor.update_device_status(&id, DeviceStatus::Idle).await;

        f.monitor.stop_monitoring(&id).await;
        assert_eq!(
            f.monitor.get_device_status(&id).await,
            DeviceStatus::Offline
        );
    }
}
