//! Gateway façade.
//!
//! Owns the component graph and the background pumps that connect it:
//! dispatcher assignments flow into the executor, barcode requests flow out
//! as events, and idle status changes wake the dispatcher.

use shuttle_application::{
    BarcodeValidator, CommandExecutor, DeviceMonitor, TaskDispatcher,
};
use shuttle_domain::connector::ConnectorFactory;
use shuttle_domain::events::GatewayEvent;
use shuttle_domain::scheduling::PinnedOrNearestStrategy;
use shuttle_domain::tasks::queue::QueueEntry;
use shuttle_domain::tasks::TransportTask;
use shuttle_domain::DeviceInfo;
use shuttle_infrastructure::event_bus::InMemoryEventBus;
use shuttle_infrastructure::pool::ConnectionPool;
use shuttle_shared::config::{validate_gateway_config, GatewayConfig};
use shuttle_shared::{
    DeviceId, DeviceStatus, Direction, GatewayError, Location, Result, TaskId,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Operational entry point for the host software.
pub struct Gateway {
    config: GatewayConfig,
    pool: Arc<ConnectionPool>,
    events: Arc<InMemoryEventBus>,
    monitor: Arc<DeviceMonitor>,
    dispatcher: Arc<TaskDispatcher>,
    executor: Arc<CommandExecutor>,
    validator: Arc<BarcodeValidator>,
    pumps: StdMutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Build and wire the full component graph.
    ///
    /// The connector factory decides how devices are reached; production
    /// deployments bind a protocol connector, test mode uses the in-memory
    /// one.
    pub fn new(config: GatewayConfig, factory: Arc<dyn ConnectorFactory>) -> Result<Arc<Self>> {
        validate_gateway_config(&config).map_err(|e| GatewayError::ValidationException {
            message: e.to_string(),
        })?;

        let pool = Arc::new(ConnectionPool::new(factory, config.devices.clone()));
        let events = Arc::new(InMemoryEventBus::new(None));
        let monitor = Arc::new(DeviceMonitor::new(
            pool.clone(),
            events.clone(),
            config.device_monitor.clone(),
            config.mode,
        ));
        let (dispatcher, assignment_rx) = TaskDispatcher::new(
            Arc::new(PinnedOrNearestStrategy::new()),
            monitor.clone(),
            pool.clone(),
            config.task_dispatcher.clone(),
        );
        let (validator, request_rx) = BarcodeValidator::new(
            config.devices.len(),
            pool.clone(),
            monitor.clone(),
            dispatcher.clone(),
            events.clone(),
            config.barcode_handler.clone(),
        );
        let executor = CommandExecutor::new(
            dispatcher.clone(),
            monitor.clone(),
            validator.clone(),
            events.clone(),
            config.task_timeout.clone(),
        );

        let gateway = Arc::new(Self {
            config,
            pool,
            events,
            monitor,
            dispatcher,
            executor,
            validator,
            pumps: StdMutex::new(Vec::new()),
        });
        gateway.spawn_pumps(assignment_rx, request_rx);
        info!(
            mode = ?gateway.config.mode,
            devices = gateway.config.devices.len(),
            "gateway initialized"
        );
        Ok(gateway)
    }

    fn spawn_pumps(
        self: &Arc<Self>,
        mut assignment_rx: tokio::sync::mpsc::UnboundedReceiver<shuttle_application::TaskAssignment>,
        request_rx: tokio::sync::mpsc::Receiver<shuttle_application::BarcodeRequest>,
    ) {
        let mut pumps = self.pumps.lock().expect("pump registry poisoned");

        // Dispatcher assignments drive the executor.
        let executor = self.executor.clone();
        pumps.push(tokio::spawn(async move {
            while let Some(assignment) = assignment_rx.recv().await {
                let task_id = assignment.task.task_id.clone();
                if let Err(err) = executor.execute(assignment).await {
                    error!(task_id = %task_id, error = %err, "command execution failed");
                }
            }
        }));

        // Barcode requests become BarcodeReceived events.
        let events = self.events.clone();
        pumps.push(tokio::spawn(BarcodeValidator::run_request_pump(
            request_rx, events,
        )));

        // A device going idle picks up pending work.
        let dispatcher = self.dispatcher.clone();
        let mut status_rx = self.events.subscribe_all();
        pumps.push(tokio::spawn(async move {
            loop {
                match status_rx.recv().await {
                    Ok(GatewayEvent::DeviceStatusChanged {
                        new_status: DeviceStatus::Idle,
                        ..
                    }) => dispatcher.on_device_idle(),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "idle listener lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Connect a device and bring it under monitoring.
    pub async fn activate_device(&self, device_id: &DeviceId) -> Result<DeviceStatus> {
        self.monitor.start_monitoring(device_id).await
    }

    /// Release a device's connector and drop its status.
    pub async fn deactivate_device(&self, device_id: &DeviceId) -> Result<()> {
        self.require_registered(device_id)?;
        self.monitor.stop_monitoring(device_id).await;
        Ok(())
    }

    /// True when the device's connector exists and reports connected.
    pub async fn is_connected(&self, device_id: &DeviceId) -> bool {
        if !self.pool.is_created(device_id).await {
            return false;
        }
        match self.pool.get(device_id).await {
            Ok(connector) => connector.is_connected(),
            Err(_) => false,
        }
    }

    pub async fn get_device_status(&self, device_id: &DeviceId) -> Result<DeviceStatus> {
        self.require_registered(device_id)?;
        Ok(self.monitor.get_device_status(device_id).await)
    }

    pub async fn reset_device_status(&self, device_id: &DeviceId) -> Result<bool> {
        self.monitor.reset_device_status(device_id).await
    }

    /// Test-mode-only full reset of a device's data block.
    pub async fn reset_system(&self, device_id: &DeviceId) -> Result<()> {
        self.monitor.reset_system(device_id).await
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub async fn send_command(&self, task: TransportTask) -> Result<()> {
        self.send_multiple_commands(vec![task]).await
    }

    /// Validate and enqueue a batch of transport tasks.
    ///
    /// Task ids must be unique across the batch, the queue and the fleet's
    /// in-flight work. Device-pinned tasks additionally require the device
    /// to report `connected_to_software`.
    pub async fn send_multiple_commands(&self, tasks: Vec<TransportTask>) -> Result<()> {
        if tasks.is_empty() {
            return Err(GatewayError::ValidationException {
                message: "task list must not be empty".to_string(),
            });
        }
        let mut batch_ids = HashSet::new();
        for task in &tasks {
            task.validate()?;
            if !batch_ids.insert(task.task_id.clone()) {
                return Err(GatewayError::ValidationException {
                    message: format!("duplicate task id in batch: {}", task.task_id),
                });
            }
            if self.dispatcher.knows_task(&task.task_id) {
                return Err(GatewayError::InvalidOperation {
                    message: format!("task {} is already queued or assigned", task.task_id),
                });
            }
            if let Some(device_id) = &task.device_id {
                self.require_device_accepts_commands(device_id).await?;
            }
        }
        self.dispatcher.enqueue_tasks(tasks)
    }

    /// A pinned task needs its device registered and connected to the
    /// gateway from the PLC side.
    async fn require_device_accepts_commands(&self, device_id: &DeviceId) -> Result<()> {
        let signals = self.pool.profile(device_id)?.signals.clone();
        let connector = self.pool.get(device_id).await?;
        let connected = connector
            .read_bool(&signals.connected_to_software)
            .await
            .map_err(|e| e.into_gateway_error(device_id))?;
        if !connected {
            return Err(GatewayError::InvalidOperation {
                message: format!("device {} is not connected to the software", device_id),
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Deliver the host software's barcode verdict.
    pub async fn send_validation_result(
        &self,
        device_id: &DeviceId,
        task_id: &TaskId,
        is_valid: bool,
        target: Option<Location>,
        direction: Direction,
        gate_number: u16,
    ) -> Result<()> {
        self.require_registered(device_id)?;
        if is_valid && target.is_none() {
            return Err(GatewayError::ValidationException {
                message: format!("valid barcode for task {} requires a target", task_id),
            });
        }
        self.validator
            .send_validation_result(device_id, task_id, is_valid, target, direction, gate_number)
            .await
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    pub fn pause_queue(&self) {
        self.dispatcher.pause();
    }

    pub fn resume_queue(&self) -> Result<()> {
        self.dispatcher.resume()
    }

    pub fn is_pause_queue(&self) -> bool {
        self.dispatcher.is_paused()
    }

    /// Snapshot of queued (not yet assigned) tasks in dispatch order.
    pub fn get_pending_tasks(&self) -> Vec<TransportTask> {
        self.dispatcher
            .get_queued_tasks()
            .into_iter()
            .map(|entry: QueueEntry| entry.task)
            .collect()
    }

    /// Remove queued tasks by id. Only allowed while the queue is paused;
    /// in-flight tasks are never removed here.
    pub fn remove_transport_tasks(&self, task_ids: &[TaskId]) -> Result<bool> {
        if task_ids.is_empty() {
            return Err(GatewayError::ValidationException {
                message: "task id list must not be empty".to_string(),
            });
        }
        if !self.dispatcher.is_paused() {
            return Err(GatewayError::InvalidOperation {
                message: "queue must be paused to remove tasks".to_string(),
            });
        }
        Ok(self.dispatcher.remove_tasks(task_ids))
    }

    pub fn get_current_task(&self, device_id: &DeviceId) -> Option<TaskId> {
        self.dispatcher.get_current_task(device_id)
    }

    // ------------------------------------------------------------------
    // Device info
    // ------------------------------------------------------------------

    pub async fn get_idle_devices(&self) -> Vec<DeviceInfo> {
        self.monitor.get_idle_devices().await
    }

    pub async fn get_actual_location(&self, device_id: &DeviceId) -> Option<Location> {
        self.monitor.get_current_location(device_id).await
    }

    // ------------------------------------------------------------------
    // Events & lifecycle
    // ------------------------------------------------------------------

    /// Subscribe to all gateway events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe_all()
    }

    /// Cancel a running command's poll; used by operator tooling.
    pub fn cancel_task(&self, task_id: &TaskId) -> bool {
        self.executor.cancel_task(task_id)
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Tear the gateway down: stop dispatching, cancel polls, abandon
    /// pending validations and release every connector. Idempotent.
    pub async fn shutdown(&self) {
        info!("gateway shutting down");
        self.dispatcher.dispose();
        self.executor.dispose();
        self.validator.dispose();
        let pumps = {
            let mut pumps = self.pumps.lock().expect("pump registry poisoned");
            std::mem::take(&mut *pumps)
        };
        for pump in pumps {
            pump.abort();
        }
        self.pool.dispose().await;
    }

    fn require_registered(&self, device_id: &DeviceId) -> Result<()> {
        if !self.monitor.is_registered(device_id) {
            return Err(GatewayError::DeviceNotRegistered {
                device_id: device_id.clone(),
            });
        }
        Ok(())
    }
}
