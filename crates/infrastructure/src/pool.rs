//! Per-device connection pool.
//!
//! One connector per device, created lazily and exactly once: concurrent
//! requests for the same device share one creation attempt. A failed
//! creation leaves the slot empty so later attempts can retry.

use shuttle_domain::connector::{ConnectorFactory, PlcConnector};
use shuttle_shared::{DeviceId, DeviceProfile, GatewayError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

type ConnectorCell = Arc<OnceCell<Arc<dyn PlcConnector>>>;

pub struct ConnectionPool {
    factory: Arc<dyn ConnectorFactory>,
    profiles: HashMap<DeviceId, DeviceProfile>,
    slots: Mutex<HashMap<DeviceId, ConnectorCell>>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectorFactory>, profiles: Vec<DeviceProfile>) -> Self {
        Self {
            factory,
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn profile(&self, device_id: &DeviceId) -> Result<&DeviceProfile> {
        self.profiles
            .get(device_id)
            .ok_or_else(|| GatewayError::DeviceNotRegistered {
                device_id: device_id.clone(),
            })
    }

    pub fn profiles(&self) -> &HashMap<DeviceId, DeviceProfile> {
        &self.profiles
    }

    /// The connector for a device, creating it on first use.
    ///
    /// Creation is single-flight: concurrent callers for the same device
    /// wait on one factory call and receive the same instance.
    pub async fn get(&self, device_id: &DeviceId) -> Result<Arc<dyn PlcConnector>> {
        let profile = self.profile(device_id)?.clone();
        let cell = {
            let mut slots = self.slots.lock().await;
            slots
                .entry(device_id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let connector = cell
            .get_or_try_init(|| async {
                debug!(device_id = %device_id, "creating plc connector");
                self.factory.create(&profile).await
            })
            .await
            .map_err(|e| e.into_gateway_error(device_id))?;
        Ok(connector.clone())
    }

    /// True when a connector has been created for the device.
    pub async fn is_created(&self, device_id: &DeviceId) -> bool {
        let slots = self.slots.lock().await;
        slots
            .get(device_id)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Drop the device's slot and release its connector, if any.
    pub async fn remove(&self, device_id: &DeviceId) {
        let cell = {
            let mut slots = self.slots.lock().await;
            slots.remove(device_id)
        };
        if let Some(cell) = cell {
            if let Some(connector) = cell.get() {
                connector.disconnect().await;
                debug!(device_id = %device_id, "released plc connector");
            }
        }
    }

    /// Release every connector in the pool.
    pub async fn dispose(&self) {
        let cells: Vec<(DeviceId, ConnectorCell)> = {
            let mut slots = self.slots.lock().await;
            slots.drain().collect()
        };
        for (device_id, cell) in cells {
            if let Some(connector) = cell.get() {
                connector.disconnect().await;
            } else {
                warn!(device_id = %device_id, "disposing pool slot that never connected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shuttle_domain::connector::{PlcError, PlcResult};
    use shuttle_shared::devices::SignalMap;
    use std::sync::atomic::{AtomicU32, Ordering};

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

    struct NullConnector;

    #[async_trait]
    impl PlcConnector for NullConnector {
        async fn read_bool(&self, _address: &str) -> PlcResult<bool> {
            Ok(false)
        }
        async fn write_bool(&self, _address: &str, _value: bool) -> PlcResult<()> {
            Ok(())
        }
        async fn read_i16(&self, _address: &str) -> PlcResult<i16> {
            Ok(0)
        }
        async fn write_i16(&self, _address: &str, _value: i16) -> PlcResult<()> {
            Ok(())
        }
        async fn read_i32(&self, _address: &str) -> PlcResult<i32> {
            Ok(0)
        }
        async fn write_i32(&self, _address: &str, _value: i32) -> PlcResult<()> {
            Ok(())
        }
        async fn read_string(&self, _address: &str) -> PlcResult<String> {
            Ok(String::new())
        }
        async fn write_string(&self, _address: &str, _value: &str) -> PlcResult<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn ensure_connected(&self) -> PlcResult<()> {
            Ok(())
        }
        async fn disconnect(&self) {}
    }

    /// Counts creations; optionally fails the first N of them.
    struct CountingFactory {
        creations: AtomicU32,
        failures_remaining: AtomicU32,
    }

    impl CountingFactory {
        fn new(failures: u32) -> Self {
            Self {
                creations: AtomicU32::new(0),
                failures_remaining: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl ConnectorFactory for CountingFactory {
        async fn create(&self, _profile: &DeviceProfile) -> PlcResult<Arc<dyn PlcConnector>> {
            self.creations.fetch_add(1, Ordering::SeqCst);
            let should_fail = self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(PlcError::ConnectionFailed {
                    message: "scripted".to_string(),
                });
            }
            Ok(Arc::new(NullConnector))
        }
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_creation() {
        let factory = Arc::new(CountingFactory::new(0));
        let pool = Arc::new(ConnectionPool::new(factory.clone(), vec![profile("D1")]));
        let id = DeviceId::from("D1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let id = id.clone();
                tokio::spawn(async move { pool.get(&id).await.is_ok() })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(factory.creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_clears_slot_for_retry() {
        let factory = Arc::new(CountingFactory::new(1));
        let pool = ConnectionPool::new(factory.clone(), vec![profile("D1")]);
        let id = DeviceId::from("D1");

        assert!(pool.get(&id).await.is_err());
        assert!(!pool.is_created(&id).await);

        assert!(pool.get(&id).await.is_ok());
        assert!(pool.is_created(&id).await);
        assert_eq!(factory.creations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected() {
        let pool = ConnectionPool::new(Arc::new(CountingFactory::new(0)), vec![profile("D1")]);
        let err = match pool.get(&DeviceId::from("GHOST")).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, GatewayError::DeviceNotRegistered { .. }));
    }

    #[tokio::test]
    async fn test_remove_clears_created_slot() {
        let pool = ConnectionPool::new(Arc::new(CountingFactory::new(0)), vec![profile("D1")]);
        let id = DeviceId::from("D1");
        pool.get(&id).await.unwrap();
        assert!(pool.is_created(&id).await);

        pool.remove(&id).await;
        assert!(!pool.is_created(&id).await);
    }
}
