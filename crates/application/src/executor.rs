//! Command executor
//!
//! Owns the active polling tasks, one per assigned transport task, each
//! with its own cancellation token. Forwards strategy outcomes through the
//! [`OutcomeReporter`], which guarantees at most one terminal outcome per
//! task.

use crate::barcode::BarcodeValidator;
use crate::commands::{
    CommandContext, CommandStrategy, InboundStrategy, OutboundStrategy, OutcomeReporter,
    TransferStrategy,
};
use crate::dispatcher::{TaskAssignment, TaskDispatcher};
use crate::monitor::DeviceMonitor;
use dashmap::DashMap;
use shuttle_domain::event_bus::EventPublisher;
use shuttle_domain::shared_kernel::{CommandType, GatewayError, Result, TaskId};
use shuttle_shared::config::TaskTimeoutConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ActivePoll {
    token: CancellationToken,
}

pub struct CommandExecutor {
    active: DashMap<TaskId, ActivePoll>,
    dispatcher: Arc<TaskDispatcher>,
    monitor: Arc<DeviceMonitor>,
    validator: Arc<BarcodeValidator>,
    events: Arc<dyn EventPublisher>,
    timeouts: TaskTimeoutConfig,
    disposed: AtomicBool,
}

impl CommandExecutor {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        monitor: Arc<DeviceMonitor>,
        validator: Arc<BarcodeValidator>,
        events: Arc<dyn EventPublisher>,
        timeouts: TaskTimeoutConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            active: DashMap::new(),
            dispatcher,
            monitor,
            validator,
            events,
            timeouts,
            disposed: AtomicBool::new(false),
        })
    }

    fn strategy_for(&self, command_type: CommandType) -> Arc<dyn CommandStrategy> {
        match command_type {
            CommandType::Inbound => Arc::new(InboundStrategy::new(self.validator.clone())),
            CommandType::Outbound => Arc::new(OutboundStrategy),
            CommandType::Transfer => Arc::new(TransferStrategy),
        }
    }

    /// Run one assigned task to its outcome.
    ///
    /// Triggers the PLC writes synchronously; the polling loop runs as a
    /// background task registered under the task id. Trigger failures emit
    /// `TaskFailed` and propagate.
    pub async fn execute(self: &Arc<Self>, assignment: TaskAssignment) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(GatewayError::InvalidOperation {
                message: "command executor is disposed".to_string(),
            });
        }
        let task = assignment.task;
        let profile = assignment.profile;
        if task.task_id.is_empty() || profile.id.is_empty() {
            return Err(GatewayError::ValidationException {
                message: "task and device ids must not be empty".to_string(),
            });
        }

        let command_type = task.command_type;
        let strategy = self.strategy_for(command_type);
        let ctx = CommandContext {
            device_id: profile.id.clone(),
            task: task.clone(),
            signals: profile.signals.clone(),
            connector: assignment.connector,
            timeout: self.timeouts.timeout_for(command_type),
            timeout_minutes: self.timeouts.minutes_for(command_type),
        };
        let reporter = Arc::new(OutcomeReporter::new(
            profile.id.clone(),
            task.task_id.clone(),
            self.dispatcher.clone(),
            self.monitor.clone(),
            self.events.clone(),
        ));

        if let Err(err) = strategy.trigger(&ctx).await {
            warn!(task_id = %task.task_id, device_id = %profile.id, error = %err, "trigger failed");
            reporter.failed_error(&err).await;
            // A task that never started polling must not linger assigned.
            self.dispatcher
                .complete_task_assignment(&profile.id, &task.task_id);
            return Err(err);
        }

        let token = CancellationToken::new();
        self.active.insert(
            task.task_id.clone(),
            ActivePoll {
                token: token.clone(),
            },
        );
        info!(task_id = %task.task_id, device_id = %profile.id, command = %command_type, "polling started");

        let executor = Arc::clone(self);
        let task_id = task.task_id.clone();
        tokio::spawn(async move {
            if let Err(err) = strategy.poll(&ctx, reporter, token).await {
                warn!(task_id = %task_id, error = %err, "polling ended with error");
            }
            executor.active.remove(&task_id);
            debug!(task_id = %task_id, "poll task released");
        });
        Ok(())
    }

    /// Fire the cancellation token of an active poll.
    pub fn cancel_task(&self, task_id: &TaskId) -> bool {
        match self.active.get(task_id) {
            Some(entry) => {
                entry.token.cancel();
                info!(task_id = %task_id, "poll cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel and release every outstanding poll.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        for entry in self.active.iter() {
            entry.value().token.cancel();
        }
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_domain::scheduling::PinnedOrNearestStrategy;
    use shuttle_domain::tasks::TransportTaskBuilder;
    use shuttle_infrastructure::event_bus::InMemoryEventBus;
    use shuttle_infrastructure::plc::in_memory::{InMemoryConnectorFactory, InMemoryPlcConnector};
    use shuttle_infrastructure::pool::ConnectionPool;
    use shuttle_domain::events::GatewayEvent;
    use shuttle_shared::config::{
        BarcodeHandlerConfig, DeviceMonitorConfig, GatewayMode, PlcConfig, TaskDispatcherConfig,
    };
    use shuttle_shared::devices::{DeviceProfile, SignalMap};
    use shuttle_shared::{DeviceId, DeviceStatus, Direction, Location};
    use tokio::sync::broadcast;

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
        dispatcher: Arc<TaskDispatcher>,
        monitor: Arc<DeviceMonitor>,
        executor: Arc<CommandExecutor>,
    }

    fn fixture() -> Fixture {
        let factory = Arc::new(InMemoryConnectorFactory::new(PlcConfig::default()));
        let pool = Arc::new(ConnectionPool::new(
            factory.clone(),
            vec![profile("SHUTTLE_01")],
        ));
        let bus = Arc::new(InMemoryEventBus::new(None));
        let monitor = Arc::new(DeviceMonitor::new(
            pool.clone(),
            bus.clone(),
            DeviceMonitorConfig::default(),
            GatewayMode::Test,
        ));
        let (dispatcher, _assignment_rx) = TaskDispatcher::new(
            Arc::new(PinnedOrNearestStrategy::new()),
            monitor.clone(),
            pool.clone(),
            TaskDispatcherConfig::default(),
        );
        let (validator, _request_rx) = BarcodeValidator::new(
            1,
            pool,
            monitor.clone(),
            dispatcher.clone(),
            bus.clone(),
            BarcodeHandlerConfig::default(),
        );
        let executor = CommandExecutor::new(
            dispatcher.clone(),
            monitor.clone(),
            validator,
            bus.clone(),
            TaskTimeoutConfig {
                inbound_timeout_minutes: 1,
                outbound_timeout_minutes: 1,
                transfer_timeout_minutes: 1,
            },
        );
        Fixture {
            factory,
            bus,
            dispatcher,
            monitor,
            executor,
        }
    }

    fn outbound_assignment(f: &Fixture) -> (TaskAssignment, Arc<InMemoryPlcConnector>) {
        let device_id = DeviceId::from("SHUTTLE_01");
        let plc = f.factory.handle(&device_id);
        let task = TransportTaskBuilder::new("T1", CommandType::Outbound)
            .source(Location::new(1, 2, 3))
            .gate(2)
            .out_dir(Direction::Bottom)
            .build()
            .unwrap();
        (
            TaskAssignment {
                task,
                profile: profile("SHUTTLE_01"),
                connector: plc.clone(),
            },
            plc,
        )
    }

    async fn next_task_event(rx: &mut broadcast::Receiver<GatewayEvent>) -> GatewayEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if !matches!(event, GatewayEvent::DeviceStatusChanged { .. }) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_success_emits_once_and_idles_device() {
        let f = fixture();
        let (assignment, plc) = outbound_assignment(&f);
        let signals = SignalMap::for_data_block("DB66");
        let mut rx = f.bus.subscribe_all();

        f.executor.execute(assignment).await.unwrap();
        assert_eq!(f.executor.active_count(), 1);

        plc.set_bool(&signals.outbound_complete, true);

        match next_task_event(&mut rx).await {
            GatewayEvent::TaskSucceeded { task_id, .. } => {
                assert_eq!(task_id.as_str(), "T1");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            f.monitor
                .get_device_status(&DeviceId::from("SHUTTLE_01"))
                .await,
            DeviceStatus::Idle
        );
        // Registration is released once the poll task unwinds.
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(f.executor.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_emits_failed_1006() {
        let f = fixture();
        let (assignment, _plc) = outbound_assignment(&f);
        let mut rx = f.bus.subscribe_all();

        f.executor.execute(assignment).await.unwrap();

        match next_task_event(&mut rx).await {
            GatewayEvent::TaskFailed { error, .. } => {
                assert_eq!(error.code, 1006);
                assert!(error.message.contains("Timeout"));
                assert!(error.message.contains("1 minutes"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        // Timeout does not pause the dispatcher.
        assert!(!f.dispatcher.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_reports_device_code_and_pauses() {
        let f = fixture();
        let (assignment, plc) = outbound_assignment(&f);
        let signals = SignalMap::for_data_block("DB66");
        let mut rx = f.bus.subscribe_all();

        plc.set_bool(&signals.alarm, true);
        plc.set_i16(&signals.error_code, 7);

        f.executor.execute(assignment).await.unwrap();

        match next_task_event(&mut rx).await {
            GatewayEvent::TaskFailed { error, .. } => {
                assert_eq!(error.code, 7);
                assert_eq!(error.message, "Target location does not match");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(f.dispatcher.is_paused());
        assert_eq!(
            f.monitor
                .get_device_status(&DeviceId::from("SHUTTLE_01"))
                .await,
            DeviceStatus::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_then_device_cancel_emits_cancelled() {
        let f = fixture();
        let (assignment, plc) = outbound_assignment(&f);
        let signals = SignalMap::for_data_block("DB66");
        let mut rx = f.bus.subscribe_all();

        plc.set_bool(&signals.alarm, true);
        plc.set_i16(&signals.error_code, 7);
        f.executor.execute(assignment).await.unwrap();

        // First the running failure...
        match next_task_event(&mut rx).await {
            GatewayEvent::TaskFailed { error, .. } => assert_eq!(error.code, 7),
            other => panic!("unexpected event {:?}", other),
        }

        // ...then the device cancels inside the resolution window.
        plc.set_bool(&signals.cancel_command, true);
        match next_task_event(&mut rx).await {
            GatewayEvent::TaskCancelled { task_id, .. } => {
                assert_eq!(task_id.as_str(), "T1");
            }
            other => panic!("unexpected event {:?}", other),
        }
        // Device stays in Error; dispatcher stays paused.
        assert!(f.dispatcher.is_paused());
        assert_eq!(
            f.monitor
                .get_device_status(&DeviceId::from("SHUTTLE_01"))
                .await,
            DeviceStatus::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_cancel_emits_cancelled_and_faults_device() {
        let f = fixture();
        let (assignment, plc) = outbound_assignment(&f);
        let signals = SignalMap::for_data_block("DB66");
        let mut rx = f.bus.subscribe_all();

        plc.set_bool(&signals.cancel_command, true);
        f.executor.execute(assignment).await.unwrap();

        match next_task_event(&mut rx).await {
            GatewayEvent::TaskCancelled { .. } => {}
            other => panic!("unexpected event {:?}", other),
        }
        // Device-initiated cancel is not an error: no pause.
        assert!(!f.dispatcher.is_paused_by_failure());
        assert_eq!(
            f.monitor
                .get_device_status(&DeviceId::from("SHUTTLE_01"))
                .await,
            DeviceStatus::Error
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_task_unwinds_without_outcome() {
        let f = fixture();
        let (assignment, _plc) = outbound_assignment(&f);
        let mut rx = f.bus.subscribe_all();

        f.executor.execute(assignment).await.unwrap();
        assert!(f.executor.cancel_task(&TaskId::from("T1")));

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(f.executor.active_count(), 0);
        // No outcome event was emitted.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_false() {
        let f = fixture();
        assert!(!f.executor.cancel_task(&TaskId::from("missing")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_cancels_all_polls() {
        let f = fixture();
        let (assignment, _plc) = outbound_assignment(&f);
        f.executor.execute(assignment).await.unwrap();

        f.executor.dispose();
        assert_eq!(f.executor.active_count(), 0);

        let (assignment2, _) = outbound_assignment(&f);
        assert!(f.executor.execute(assignment2).await.is_err());
    }
}
