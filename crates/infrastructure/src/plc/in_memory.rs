//! In-memory PLC connector.
//!
//! Backs test mode and the test suites: a signal store per device that the
//! "device side" of a test can mutate while the gateway drives the
//! connector side. Connection failures and bad addresses can be scripted.

use async_trait::async_trait;
use shuttle_domain::connector::{ConnectorFactory, PlcConnector, PlcError, PlcResult};
use shuttle_shared::config::PlcConfig;
use shuttle_shared::{DeviceId, DeviceProfile};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
enum SignalValue {
    Bit(bool),
    Word(i16),
    DWord(i32),
    Text(String),
}

/// Simulated PLC for one device.
pub struct InMemoryPlcConnector {
    device_id: DeviceId,
    signals: StdMutex<HashMap<String, SignalValue>>,
    /// Serializes I/O: one in-flight request per device, as on a real PLC
    /// transport.
    io_gate: Mutex<()>,
    connected: AtomicBool,
    remaining_connect_failures: AtomicU32,
    failing_addresses: StdMutex<HashSet<String>>,
    policy: PlcConfig,
}

impl InMemoryPlcConnector {
    pub fn new(device_id: DeviceId, policy: PlcConfig) -> Self {
        Self {
            device_id,
            signals: StdMutex::new(HashMap::new()),
            io_gate: Mutex::new(()),
            connected: AtomicBool::new(true),
            remaining_connect_failures: AtomicU32::new(0),
            failing_addresses: StdMutex::new(HashSet::new()),
            policy,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    // --- device-side scripting (bypasses the connection) ---

    pub fn set_bool(&self, address: &str, value: bool) {
        self.store(address, SignalValue::Bit(value));
    }

    pub fn set_i16(&self, address: &str, value: i16) {
        self.store(address, SignalValue::Word(value));
    }

    pub fn set_i32(&self, address: &str, value: i32) {
        self.store(address, SignalValue::DWord(value));
    }

    pub fn set_string(&self, address: &str, value: &str) {
        self.store(address, SignalValue::Text(value.to_string()));
    }

    pub fn get_bool(&self, address: &str) -> bool {
        match self.load(address) {
            Some(SignalValue::Bit(v)) => v,
            _ => false,
        }
    }

    pub fn get_i16(&self, address: &str) -> i16 {
        match self.load(address) {
            Some(SignalValue::Word(v)) => v,
            _ => 0,
        }
    }

    pub fn get_string(&self, address: &str) -> String {
        match self.load(address) {
            Some(SignalValue::Text(v)) => v,
            _ => String::new(),
        }
    }

    /// Make every read/write on this address fail until cleared.
    pub fn fail_address(&self, address: &str) {
        self.failing_addresses
            .lock()
            .expect("fail set poisoned")
            .insert(address.to_string());
    }

    pub fn clear_failing_address(&self, address: &str) {
        self.failing_addresses
            .lock()
            .expect("fail set poisoned")
            .remove(address);
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.remaining_connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    // --- internals ---

    fn store(&self, address: &str, value: SignalValue) {
        self.signals
            .lock()
            .expect("signal store poisoned")
            .insert(address.to_string(), value);
    }

    fn load(&self, address: &str) -> Option<SignalValue> {
        self.signals
            .lock()
            .expect("signal store poisoned")
            .get(address)
            .cloned()
    }

    fn check_reachable(&self, address: &str) -> PlcResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PlcError::ConnectionFailed {
                message: format!("device {} is not connected", self.device_id),
            });
        }
        let failing = self
            .failing_addresses
            .lock()
            .expect("fail set poisoned")
            .contains(address);
        if failing {
            return Err(PlcError::Protocol {
                message: format!("scripted failure on {}", address),
            });
        }
        Ok(())
    }

    fn try_connect_once(&self) -> bool {
        self.remaining_connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }
}

#[async_trait]
impl PlcConnector for InMemoryPlcConnector {
    async fn read_bool(&self, address: &str) -> PlcResult<bool> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        match self.load(address) {
            None | Some(SignalValue::Bit(_)) => Ok(self.get_bool(address)),
            Some(_) => Err(PlcError::TypeMismatch {
                address: address.to_string(),
                expected: "bool".to_string(),
            }),
        }
    }

    async fn write_bool(&self, address: &str, value: bool) -> PlcResult<()> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        trace!(device_id = %self.device_id, address, value, "plc write");
        self.store(address, SignalValue::Bit(value));
        Ok(())
    }

    async fn read_i16(&self, address: &str) -> PlcResult<i16> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        match self.load(address) {
            None | Some(SignalValue::Word(_)) => Ok(self.get_i16(address)),
            Some(_) => Err(PlcError::TypeMismatch {
                address: address.to_string(),
                expected: "i16".to_string(),
            }),
        }
    }

    async fn write_i16(&self, address: &str, value: i16) -> PlcResult<()> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        trace!(device_id = %self.device_id, address, value, "plc write");
        self.store(address, SignalValue::Word(value));
        Ok(())
    }

    async fn read_i32(&self, address: &str) -> PlcResult<i32> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        match self.load(address) {
            None => Ok(0),
            Some(SignalValue::DWord(v)) => Ok(v),
            Some(_) => Err(PlcError::TypeMismatch {
                address: address.to_string(),
                expected: "i32".to_string(),
            }),
        }
    }

    async fn write_i32(&self, address: &str, value: i32) -> PlcResult<()> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        self.store(address, SignalValue::DWord(value));
        Ok(())
    }

    async fn read_string(&self, address: &str) -> PlcResult<String> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        match self.load(address) {
            None | Some(SignalValue::Text(_)) => Ok(self.get_string(address)),
            Some(_) => Err(PlcError::TypeMismatch {
                address: address.to_string(),
                expected: "string".to_string(),
            }),
        }
    }

    async fn write_string(&self, address: &str, value: &str) -> PlcResult<()> {
        let _io = self.io_gate.lock().await;
        self.check_reachable(address)?;
        self.store(address, SignalValue::Text(value.to_string()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn ensure_connected(&self) -> PlcResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            if self.try_connect_once() {
                self.connected.store(true, Ordering::SeqCst);
                return Ok(());
            }
            attempt += 1;
            if attempt >= self.policy.max_connection_retries {
                return Err(PlcError::ConnectionFailed {
                    message: format!(
                        "device {} unreachable after {} attempts",
                        self.device_id, attempt
                    ),
                });
            }
            tokio::time::sleep(self.policy.retry_delay()).await;
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Factory handing out one shared in-memory connector per device.
///
/// Tests grab the same instance through [`InMemoryConnectorFactory::handle`]
/// to play the device side.
#[derive(Default)]
pub struct InMemoryConnectorFactory {
    policy: PlcConfig,
    connectors: StdMutex<HashMap<DeviceId, Arc<InMemoryPlcConnector>>>,
}

impl InMemoryConnectorFactory {
    pub fn new(policy: PlcConfig) -> Self {
        Self {
            policy,
            connectors: StdMutex::new(HashMap::new()),
        }
    }

    /// The shared connector instance for a device, creating it on demand.
    pub fn handle(&self, device_id: &DeviceId) -> Arc<InMemoryPlcConnector> {
        let mut connectors = self.connectors.lock().expect("factory registry poisoned");
        connectors
            .entry(device_id.clone())
            .or_insert_with(|| {
                Arc::new(InMemoryPlcConnector::new(
                    device_id.clone(),
                    self.policy.clone(),
                ))
            })
            .clone()
    }
}

#[async_trait]
impl ConnectorFactory for InMemoryConnectorFactory {
    async fn create(&self, profile: &DeviceProfile) -> PlcResult<Arc<dyn PlcConnector>> {
        let connector = self.handle(&profile.id);
        connector.ensure_connected().await?;
        Ok(connector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> InMemoryPlcConnector {
        InMemoryPlcConnector::new(DeviceId::from("SHUTTLE_01"), PlcConfig::default())
    }

    #[tokio::test]
    async fn test_unset_addresses_read_as_zeroes() {
        let plc = connector();
        assert!(!plc.read_bool("DB66.DBX0.0").await.unwrap());
        assert_eq!(plc.read_i16("DB66.DBW4").await.unwrap(), 0);
        assert_eq!(plc.read_string("DB66.DBW26").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let plc = connector();
        plc.write_bool("DB66.DBX0.0", true).await.unwrap();
        plc.write_i16("DB66.DBW4", 7).await.unwrap();
        plc.write_string("DB66.DBW26", "A").await.unwrap();

        assert!(plc.read_bool("DB66.DBX0.0").await.unwrap());
        assert_eq!(plc.read_i16("DB66.DBW4").await.unwrap(), 7);
        assert_eq!(plc.read_string("DB66.DBW26").await.unwrap(), "A");
    }

    #[tokio::test]
    async fn test_type_mismatch_is_rejected() {
        let plc = connector();
        plc.set_i16("DB66.DBW4", 3);
        let err = plc.read_bool("DB66.DBW4").await.unwrap_err();
        assert!(matches!(err, PlcError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_scripted_address_failure() {
        let plc = connector();
        plc.fail_address("DB66.DBW20");
        assert!(plc.read_i16("DB66.DBW20").await.is_err());
        plc.clear_failing_address("DB66.DBW20");
        assert!(plc.read_i16("DB66.DBW20").await.is_ok());
    }

    #[tokio::test]
    async fn test_io_refused_while_disconnected() {
        let plc = connector();
        plc.drop_connection();
        let err = plc.read_bool("DB66.DBX0.0").await.unwrap_err();
        assert!(matches!(err, PlcError::ConnectionFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_retries_until_success() {
        let plc = connector();
        plc.drop_connection();
        plc.fail_next_connects(2);

        plc.ensure_connected().await.unwrap();
        assert!(plc.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_retries() {
        let plc = connector();
        plc.drop_connection();
        plc.fail_next_connects(10);

        let err = plc.ensure_connected().await.unwrap_err();
        assert!(matches!(err, PlcError::ConnectionFailed { .. }));
        assert!(!plc.is_connected());
    }
}
