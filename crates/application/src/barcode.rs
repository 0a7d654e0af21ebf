//! Barcode validator
//!
//! Pairs a device-initiated barcode read with the external validation
//! verdict. A pending entry per task awaits the verdict behind a timeout;
//! requests fan out to the host software through a bounded channel whose
//! capacity equals the fleet size.

use crate::dispatcher::TaskDispatcher;
use crate::monitor::DeviceMonitor;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use shuttle_domain::connector::PlcConnector;
use shuttle_domain::event_bus::EventPublisher;
use shuttle_domain::events::GatewayEvent;
use shuttle_domain::shared_kernel::{
    DeviceId, Direction, GatewayError, Location, Result, SignalMap, TaskId,
};
use shuttle_infrastructure::pool::ConnectionPool;
use shuttle_shared::config::BarcodeHandlerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const CHANNEL_SEND_RETRIES: u32 = 3;
const CHANNEL_SEND_BACKOFF: Duration = Duration::from_millis(100);

/// A barcode awaiting validation, published to the host software.
#[derive(Debug, Clone)]
pub struct BarcodeRequest {
    pub device_id: DeviceId,
    pub task_id: TaskId,
    pub barcode: String,
    pub location: Option<Location>,
    pub occurred_at: DateTime<Utc>,
}

struct PendingValidation {
    device_id: DeviceId,
    verdict_tx: oneshot::Sender<Result<()>>,
}

pub struct BarcodeValidator {
    pending: DashMap<TaskId, PendingValidation>,
    request_tx: mpsc::Sender<BarcodeRequest>,
    pool: Arc<ConnectionPool>,
    monitor: Arc<DeviceMonitor>,
    dispatcher: Arc<TaskDispatcher>,
    events: Arc<dyn EventPublisher>,
    config: BarcodeHandlerConfig,
}

impl BarcodeValidator {
    /// Build the validator and the request stream the gateway pumps to the
    /// outside world. Channel capacity is the device count, minimum one.
    pub fn new(
        device_count: usize,
        pool: Arc<ConnectionPool>,
        monitor: Arc<DeviceMonitor>,
        dispatcher: Arc<TaskDispatcher>,
        events: Arc<dyn EventPublisher>,
        config: BarcodeHandlerConfig,
    ) -> (Arc<Self>, mpsc::Receiver<BarcodeRequest>) {
        let (request_tx, request_rx) = mpsc::channel(device_count.max(1));
        let validator = Arc::new(Self {
            pending: DashMap::new(),
            request_tx,
            pool,
            monitor,
            dispatcher,
            events,
            config,
        });
        (validator, request_rx)
    }

    /// Drain the request channel and re-emit each request as a
    /// `BarcodeReceived` event for external subscribers.
    pub async fn run_request_pump(
        mut request_rx: mpsc::Receiver<BarcodeRequest>,
        events: Arc<dyn EventPublisher>,
    ) {
        while let Some(request) = request_rx.recv().await {
            let event = GatewayEvent::BarcodeReceived {
                device_id: request.device_id.clone(),
                task_id: request.task_id.clone(),
                barcode: request.barcode.clone(),
                occurred_at: request.occurred_at,
            };
            if let Err(err) = events.publish(&event).await {
                warn!(task_id = %request.task_id, error = %err, "failed to publish barcode");
            }
        }
    }

    /// Read the barcode character words in parallel and assemble the prefix
    /// of single-character results. Any read error yields an empty string.
    pub async fn read_barcode(&self, connector: &Arc<dyn PlcConnector>, signals: &SignalMap) -> String {
        let reads = signals
            .barcode_words
            .iter()
            .map(|address| connector.read_string(address));
        let results = join_all(reads).await;

        let mut barcode = String::new();
        for result in results {
            match result {
                Ok(word) => {
                    let mut chars = word.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => barcode.push(c),
                        // Blank or multi-character word ends the barcode.
                        _ => break,
                    }
                }
                Err(_) => return String::new(),
            }
        }
        barcode.truncate(self.config.max_barcode_length);
        barcode
    }

    /// Register the barcode for validation and await the verdict.
    ///
    /// Publishes a request onto the bounded channel (with bounded retry),
    /// then waits for `send_validation_result` to complete the entry within
    /// the validation timeout.
    pub async fn send_barcode(
        &self,
        device_id: DeviceId,
        task_id: TaskId,
        barcode: String,
    ) -> Result<()> {
        let (verdict_tx, verdict_rx) = oneshot::channel();
        self.pending.insert(
            task_id.clone(),
            PendingValidation {
                device_id: device_id.clone(),
                verdict_tx,
            },
        );

        let location = self.monitor.get_current_location(&device_id).await;
        let request = BarcodeRequest {
            device_id: device_id.clone(),
            task_id: task_id.clone(),
            barcode: barcode.clone(),
            location,
            occurred_at: Utc::now(),
        };
        info!(task_id = %task_id, device_id = %device_id, barcode = %barcode, "barcode read, requesting validation");

        if !self.try_publish_request(request).await {
            self.pending.remove(&task_id);
            return Err(GatewayError::ExecutionException {
                message: format!(
                    "validation channel full, dropping barcode for task {}",
                    task_id
                ),
            });
        }

        match tokio::time::timeout(self.config.validation_timeout(), verdict_rx).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) => {
                // Sender dropped: validator disposed while waiting.
                Err(GatewayError::Unknown {
                    message: format!("validation for task {} was abandoned", task_id),
                })
            }
            Err(_) => {
                self.pending.remove(&task_id);
                Err(GatewayError::Timeout {
                    message: format!(
                        "Barcode validation timed out after {} minutes",
                        self.config.validation_timeout_minutes
                    ),
                })
            }
        }
    }

    async fn try_publish_request(&self, request: BarcodeRequest) -> bool {
        let mut request = request;
        for attempt in 0..CHANNEL_SEND_RETRIES {
            match self.request_tx.try_send(request) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Full(returned)) => {
                    debug!(attempt, "validation channel full, backing off");
                    request = returned;
                    tokio::time::sleep(CHANNEL_SEND_BACKOFF).await;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        false
    }

    /// Complete a pending validation entry.
    ///
    /// Missing entries are `NotFoundTask`; a device mismatch fails the
    /// waiting task with `MismatchedDevice`.
    fn complete_entry(&self, task_id: &TaskId, device_id: &DeviceId) -> Result<()> {
        let Some((_, entry)) = self.pending.remove(task_id) else {
            return Err(GatewayError::NotFoundTask {
                task_id: task_id.clone(),
            });
        };
        if &entry.device_id == device_id {
            let _ = entry.verdict_tx.send(Ok(()));
            Ok(())
        } else {
            let err = GatewayError::MismatchedDevice {
                task_id: task_id.clone(),
                expected: entry.device_id.clone(),
                actual: device_id.clone(),
            };
            let _ = entry.verdict_tx.send(Err(GatewayError::MismatchedDevice {
                task_id: task_id.clone(),
                expected: entry.device_id,
                actual: device_id.clone(),
            }));
            Err(err)
        }
    }

    /// True when a pending entry existed for this task and device.
    pub fn try_complete_validation_task(&self, task_id: &TaskId, device_id: &DeviceId) -> bool {
        self.complete_entry(task_id, device_id).is_ok()
    }

    /// Deliver the host software's verdict and write it to the PLC.
    ///
    /// Valid barcodes get the routing target, infeed direction and gate;
    /// invalid barcodes only flip the verdict bit pair. A PLC error pauses
    /// the dispatcher and emits `TaskFailed`.
    pub async fn send_validation_result(
        &self,
        device_id: &DeviceId,
        task_id: &TaskId,
        is_valid: bool,
        target: Option<Location>,
        direction: Direction,
        gate_number: u16,
    ) -> Result<()> {
        if is_valid && target.is_none() {
            return Err(GatewayError::ValidationException {
                message: format!("valid barcode for task {} requires a target", task_id),
            });
        }

        self.complete_entry(task_id, device_id)?;

        let signals = self.pool.profile(device_id)?.signals.clone();
        let connector = self.pool.get(device_id).await?;
        let write_verdict = async {
            if is_valid {
                let target = target.expect("checked above");
                connector.write_bool(&signals.barcode_valid, true).await?;
                connector.write_bool(&signals.barcode_invalid, false).await?;
                connector.write_i16(&signals.target_floor, target.floor).await?;
                connector.write_i16(&signals.target_rail, target.rail).await?;
                connector.write_i16(&signals.target_block, target.block).await?;
                connector
                    .write_bool(&signals.in_dir_block, direction.as_plc_bool())
                    .await?;
                connector
                    .write_i16(&signals.gate_number, gate_number as i16)
                    .await?;
            } else {
                connector.write_bool(&signals.barcode_valid, false).await?;
                connector.write_bool(&signals.barcode_invalid, true).await?;
            }
            Ok::<(), shuttle_domain::connector::PlcError>(())
        };

        if let Err(plc_err) = write_verdict.await {
            let err = plc_err.into_gateway_error(device_id);
            warn!(task_id = %task_id, device_id = %device_id, error = %err, "verdict write failed");
            self.dispatcher.pause_on_failure();
            let event = GatewayEvent::TaskFailed {
                device_id: device_id.clone(),
                task_id: task_id.clone(),
                error: err.detail(),
                occurred_at: Utc::now(),
            };
            if let Err(publish_err) = self.events.publish(&event).await {
                warn!(task_id = %task_id, error = %publish_err, "failed to publish verdict failure");
            }
            return Err(err);
        }

        info!(task_id = %task_id, device_id = %device_id, is_valid, "validation result written");
        Ok(())
    }

    /// Abandon every pending validation; their waiters wake with an error.
    pub fn dispose(&self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
