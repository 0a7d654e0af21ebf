//! Command strategies
//!
//! One strategy per command type. `trigger` performs the initial PLC writes,
//! `poll` drives the device to an outcome at a one-second cadence. Outcomes
//! go through the [`OutcomeReporter`], which owns the exactly-once rules and
//! the dispatcher/monitor side effects.

pub mod inbound;
pub mod outbound;
pub mod transfer;

use crate::dispatcher::TaskDispatcher;
use crate::monitor::DeviceMonitor;
use async_trait::async_trait;
use chrono::Utc;
use shuttle_domain::connector::{PlcConnector, PlcError};
use shuttle_domain::event_bus::EventPublisher;
use shuttle_domain::events::GatewayEvent;
use shuttle_domain::shared_kernel::{
    error::running_failure_message, CommandType, DeviceId, DeviceStatus, GatewayError, Result,
    SignalMap, TaskId,
};
use shuttle_domain::tasks::TransportTask;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use inbound::InboundStrategy;
pub use outbound::OutboundStrategy;
pub use transfer::TransferStrategy;

/// Polling cadence agreed with the PLC programs.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Wait after `*_complete` before reporting success, letting the device
/// finish its handshake writes.
pub(crate) const SETTLEMENT_DELAY: Duration = Duration::from_secs(6);
/// Upper bound on the alarm-resolution sub-loop.
pub(crate) const ALARM_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Barcode value reported by an unprogrammed scanner; never validated.
pub(crate) const EMPTY_BARCODE: &str = "0000000000";

/// Everything a strategy needs for one command execution.
pub struct CommandContext {
    pub device_id: DeviceId,
    pub task: TransportTask,
    pub signals: SignalMap,
    pub connector: Arc<dyn PlcConnector>,
    pub timeout: Duration,
    pub timeout_minutes: u64,
}

/// PLC trigger + polling state machine for one command type.
#[async_trait]
pub trait CommandStrategy: Send + Sync {
    fn command_type(&self) -> CommandType;

    /// Initial PLC writes that start the move on the device.
    async fn trigger(&self, ctx: &CommandContext) -> Result<()>;

    /// Drive the device to an outcome. Emits through the reporter; a
    /// cancellation observed here returns without emitting.
    async fn poll(
        &self,
        ctx: &CommandContext,
        reporter: Arc<OutcomeReporter>,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Single point through which a task reaches its outcome.
///
/// Terminal outcomes (Succeeded, Cancelled, timeout Failed) release the
/// dispatcher assignment and fire at most once per task. A running failure
/// is not terminal: the task stays assigned while the alarm-resolution loop
/// waits for the device, and may still end in Succeeded or Cancelled.
pub struct OutcomeReporter {
    device_id: DeviceId,
    task_id: TaskId,
    dispatcher: Arc<TaskDispatcher>,
    monitor: Arc<DeviceMonitor>,
    events: Arc<dyn EventPublisher>,
    terminal_emitted: AtomicBool,
    failure_emitted: AtomicBool,
}

impl OutcomeReporter {
    pub fn new(
        device_id: DeviceId,
        task_id: TaskId,
        dispatcher: Arc<TaskDispatcher>,
        monitor: Arc<DeviceMonitor>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            device_id,
            task_id,
            dispatcher,
            monitor,
            events,
            terminal_emitted: AtomicBool::new(false),
            failure_emitted: AtomicBool::new(false),
        }
    }

    fn claim_terminal(&self) -> bool {
        !self.terminal_emitted.swap(true, Ordering::SeqCst)
    }

    async fn publish(&self, event: GatewayEvent) {
        if let Err(err) = self.events.publish(&event).await {
            warn!(task_id = %self.task_id, error = %err, "failed to publish outcome");
        }
    }

    pub async fn succeeded(&self) {
        if !self.claim_terminal() {
            return;
        }
        self.dispatcher
            .complete_task_assignment(&self.device_id, &self.task_id);
        info!(task_id = %self.task_id, device_id = %self.device_id, "task succeeded");
        self.publish(GatewayEvent::TaskSucceeded {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            occurred_at: Utc::now(),
        })
        .await;
        self.monitor
            .update_device_status(&self.device_id, DeviceStatus::Idle)
            .await;
    }

    /// Device-initiated cancel; not an error, the dispatcher keeps running.
    pub async fn cancelled(&self) {
        if !self.claim_terminal() {
            return;
        }
        self.dispatcher
            .complete_task_assignment(&self.device_id, &self.task_id);
        info!(task_id = %self.task_id, device_id = %self.device_id, "task cancelled by device");
        self.publish(GatewayEvent::TaskCancelled {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            occurred_at: Utc::now(),
        })
        .await;
        self.monitor
            .update_device_status(&self.device_id, DeviceStatus::Error)
            .await;
    }

    /// Device-reported failure: device goes to Error and the dispatcher
    /// pauses until an operator resumes. The task stays assigned while the
    /// alarm-resolution loop runs.
    pub async fn failed_running(&self, code: i16) {
        if self.failure_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        let error = GatewayError::RunningFailure {
            device_id: self.device_id.clone(),
            code,
            message: running_failure_message(code),
        };
        warn!(task_id = %self.task_id, device_id = %self.device_id, code, "task failed on device");
        self.publish(GatewayEvent::TaskFailed {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            error: error.detail(),
            occurred_at: Utc::now(),
        })
        .await;
        self.monitor
            .update_device_status(&self.device_id, DeviceStatus::Error)
            .await;
        self.dispatcher.pause_on_failure();
    }

    /// Poll timeout: terminal, removes the task, no device transition.
    pub async fn failed_timeout(&self, timeout_minutes: u64) {
        if !self.claim_terminal() {
            return;
        }
        self.dispatcher
            .complete_task_assignment(&self.device_id, &self.task_id);
        let error = GatewayError::Timeout {
            message: format!("Timeout reached after {} minutes", timeout_minutes),
        };
        warn!(task_id = %self.task_id, device_id = %self.device_id, timeout_minutes, "task timed out");
        self.publish(GatewayEvent::TaskFailed {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            error: error.detail(),
            occurred_at: Utc::now(),
        })
        .await;
    }

    /// Failure raised by the gateway itself (polling exception, connection
    /// loss, validation). Connection failures also fault the device and
    /// pause the dispatcher.
    pub async fn failed_error(&self, error: &GatewayError) {
        if self.failure_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(task_id = %self.task_id, device_id = %self.device_id, error = %error, "task failed");
        self.publish(GatewayEvent::TaskFailed {
            device_id: self.device_id.clone(),
            task_id: self.task_id.clone(),
            error: error.detail(),
            occurred_at: Utc::now(),
        })
        .await;
        if matches!(error, GatewayError::PlcConnectionFailed { .. }) {
            self.monitor
                .update_device_status(&self.device_id, DeviceStatus::Error)
                .await;
            self.dispatcher.pause_on_failure();
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }
}

/// Work done at the top of every poll tick, before the signal reads.
#[async_trait]
pub(crate) trait TickHook: Send + Sync {
    async fn on_tick(&self, ctx: &CommandContext) -> Result<()>;
}

pub(crate) struct NoopTick;

#[async_trait]
impl TickHook for NoopTick {
    async fn on_tick(&self, _ctx: &CommandContext) -> Result<()> {
        Ok(())
    }
}

struct TickSignals {
    cancel_command: bool,
    alarm: bool,
    command_rejected: bool,
    complete: bool,
}

async fn read_tick_signals(
    ctx: &CommandContext,
    complete_address: &str,
) -> std::result::Result<TickSignals, PlcError> {
    let (cancel_command, alarm, command_rejected, complete) = tokio::try_join!(
        ctx.connector.read_bool(&ctx.signals.cancel_command),
        ctx.connector.read_bool(&ctx.signals.alarm),
        ctx.connector.read_bool(&ctx.signals.command_rejected),
        ctx.connector.read_bool(complete_address),
    )?;
    Ok(TickSignals {
        cancel_command,
        alarm,
        command_rejected,
        complete,
    })
}

fn map_poll_error(ctx: &CommandContext, err: PlcError) -> GatewayError {
    match err {
        PlcError::ConnectionFailed { message } => GatewayError::PlcConnectionFailed {
            device_id: ctx.device_id.clone(),
            message,
        },
        other => GatewayError::PollingException {
            task_id: ctx.task.task_id.clone(),
            message: other.to_string(),
        },
    }
}

/// Shared polling loop for all command types.
///
/// Runs until an outcome is reported, the configured timeout elapses or the
/// cancellation token fires. A fired token returns without emission; the
/// caller context has already emitted or will.
pub(crate) async fn run_poll_loop(
    ctx: &CommandContext,
    reporter: &Arc<OutcomeReporter>,
    cancel: &CancellationToken,
    complete_address: &str,
    hook: &dyn TickHook,
) -> Result<()> {
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        if started.elapsed() >= ctx.timeout {
            reporter.failed_timeout(ctx.timeout_minutes).await;
            return Ok(());
        }

        hook.on_tick(ctx).await?;

        let signals = match read_tick_signals(ctx, complete_address).await {
            Ok(signals) => signals,
            Err(plc_err) => {
                let err = map_poll_error(ctx, plc_err);
                reporter.failed_error(&err).await;
                return Err(err);
            }
        };

        if signals.cancel_command {
            reporter.cancelled().await;
            return Ok(());
        }
        if signals.complete && !signals.alarm {
            tokio::time::sleep(SETTLEMENT_DELAY).await;
            reporter.succeeded().await;
            return Ok(());
        }
        if signals.alarm || signals.command_rejected {
            // Complete-with-alarm also lands here: treated as a running
            // failure followed by the resolution loop.
            let code = match ctx.connector.read_i16(&ctx.signals.error_code).await {
                Ok(code) => code,
                Err(plc_err) => {
                    let err = map_poll_error(ctx, plc_err);
                    reporter.failed_error(&err).await;
                    return Err(err);
                }
            };
            reporter.failed_running(code).await;
            return alarm_resolution_loop(ctx, reporter, cancel, complete_address).await;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// After a running failure, keep watching the device while the operator
/// resolves the alarm. The device may still complete or cancel the move.
async fn alarm_resolution_loop(
    ctx: &CommandContext,
    reporter: &Arc<OutcomeReporter>,
    cancel: &CancellationToken,
    complete_address: &str,
) -> Result<()> {
    let started = Instant::now();
    while started.elapsed() < ALARM_RESOLUTION_TIMEOUT {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let (cancel_command, complete) = match tokio::try_join!(
            ctx.connector.read_bool(&ctx.signals.cancel_command),
            ctx.connector.read_bool(complete_address),
        ) {
            Ok(bits) => bits,
            Err(plc_err) => {
                let err = map_poll_error(ctx, plc_err);
                warn!(task_id = %ctx.task.task_id, error = %err, "alarm resolution read failed");
                return Err(err);
            }
        };

        if cancel_command {
            reporter.cancelled().await;
            return Ok(());
        }
        if complete {
            tokio::time::sleep(SETTLEMENT_DELAY).await;
            reporter.succeeded().await;
            return Ok(());
        }
    }
    // Resolution window exhausted: device stays in Error, dispatcher
    // stays paused, the operator takes over.
    warn!(task_id = %ctx.task.task_id, device_id = %ctx.device_id, "alarm resolution timed out");
    Ok(())
}

/// Write a location's floor/rail/block words.
pub(crate) async fn write_location_words(
    connector: &Arc<dyn PlcConnector>,
    floor_address: &str,
    rail_address: &str,
    block_address: &str,
    location: &shuttle_domain::shared_kernel::Location,
) -> std::result::Result<(), PlcError> {
    connector.write_i16(floor_address, location.floor).await?;
    connector.write_i16(rail_address, location.rail).await?;
    connector.write_i16(block_address, location.block).await?;
    Ok(())
}
