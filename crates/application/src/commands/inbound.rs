//! Inbound strategy: accept a pallet at a gate and store it.
//!
//! On top of the standard polling loop, inbound watches the barcode words:
//! once per task, a freshly scanned barcode is handed to the validator,
//! whose verdict (written back by the host software) routes the pallet.
//! Polling continues to `inbound_complete` regardless.

use super::{
    run_poll_loop, CommandContext, CommandStrategy, OutcomeReporter, TickHook, EMPTY_BARCODE,
};
use crate::barcode::BarcodeValidator;
use async_trait::async_trait;
use shuttle_domain::shared_kernel::{CommandType, GatewayError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct InboundStrategy {
    validator: Arc<BarcodeValidator>,
}

impl InboundStrategy {
    pub fn new(validator: Arc<BarcodeValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl CommandStrategy for InboundStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Inbound
    }

    async fn trigger(&self, ctx: &CommandContext) -> Result<()> {
        let signals = &ctx.signals;
        let connector = &ctx.connector;

        tokio::try_join!(
            connector.write_bool(&signals.inbound_command, true),
            connector.write_bool(&signals.start_process_command, true),
        )
        .map_err(|e| e.into_gateway_error(&ctx.device_id))?;

        connector
            .write_i16(&signals.gate_number, ctx.task.gate_number as i16)
            .await
            .map_err(|e| e.into_gateway_error(&ctx.device_id))?;
        connector
            .write_bool(&signals.in_dir_block, ctx.task.in_dir_block.as_plc_bool())
            .await
            .map_err(|e| e.into_gateway_error(&ctx.device_id))?;

        debug!(task_id = %ctx.task.task_id, device_id = %ctx.device_id, "inbound command triggered");
        Ok(())
    }

    async fn poll(
        &self,
        ctx: &CommandContext,
        reporter: Arc<OutcomeReporter>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let hook = BarcodeTick {
            validator: self.validator.clone(),
            reporter: reporter.clone(),
            cancel: cancel.clone(),
            barcode_sent: AtomicBool::new(false),
        };
        let complete = ctx.signals.inbound_complete.clone();
        run_poll_loop(ctx, &reporter, &cancel, &complete, &hook).await
    }
}

/// Per-task barcode watch, run at the top of each inbound poll tick.
struct BarcodeTick {
    validator: Arc<BarcodeValidator>,
    reporter: Arc<OutcomeReporter>,
    cancel: CancellationToken,
    barcode_sent: AtomicBool,
}

#[async_trait]
impl TickHook for BarcodeTick {
    async fn on_tick(&self, ctx: &CommandContext) -> Result<()> {
        if self.barcode_sent.load(Ordering::SeqCst) {
            return Ok(());
        }
        let barcode = self.validator.read_barcode(&ctx.connector, &ctx.signals).await;
        if barcode.is_empty() || barcode == EMPTY_BARCODE {
            return Ok(());
        }
        if self.barcode_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Validation runs concurrently with the polling loop; a failed
        // validation fails the task and unwinds the poll via the token.
        let validator = self.validator.clone();
        let reporter = self.reporter.clone();
        let cancel = self.cancel.clone();
        let device_id = ctx.device_id.clone();
        let task_id = ctx.task.task_id.clone();
        tokio::spawn(async move {
            if let Err(err) = validator
                .send_barcode(device_id.clone(), task_id.clone(), barcode)
                .await
            {
                warn!(task_id = %task_id, device_id = %device_id, error = %err, "barcode validation failed");
                let err = match err {
                    validation @ GatewayError::Timeout { .. } => GatewayError::ValidationException {
                        message: validation.to_string(),
                    },
                    other => other,
                };
                reporter.failed_error(&err).await;
                cancel.cancel();
            }
        });
        Ok(())
    }
}
