//! Outbound strategy: retrieve a pallet from the racking to a gate.

use super::{run_poll_loop, CommandContext, CommandStrategy, NoopTick, OutcomeReporter};
use async_trait::async_trait;
use shuttle_domain::shared_kernel::{CommandType, GatewayError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct OutboundStrategy;

#[async_trait]
impl CommandStrategy for OutboundStrategy {
    fn command_type(&self) -> CommandType {
        CommandType::Outbound
    }

    async fn trigger(&self, ctx: &CommandContext) -> Result<()> {
        let signals = &ctx.signals;
        let connector = &ctx.connector;
        let source = ctx
            .task
            .source_location
            .ok_or_else(|| GatewayError::ValidationException {
                message: format!("outbound task {} has no source location", ctx.task.task_id),
            })?;

        tokio::try_join!(
            connector.write_bool(&signals.outbound_command, true),
            connector.write_bool(&signals.start_process_command, true),
        )
        .map_err(|e| e.into_gateway_error(&ctx.device_id))?;

        super::write_location_words(
            connector,
            &signals.source_floor,
            &signals.source_rail,
            &signals.source_block,
            &source,
        )
        .await
        .map_err(|e| e.into_gateway_error(&ctx.device_id))?;

        connector
            .write_i16(&signals.gate_number, ctx.task.gate_number as i16)
            .await
            .map_err(|e| e.into_gateway_error(&ctx.device_id))?;
        connector
            .write_bool(&signals.out_dir_block, ctx.task.out_dir_block.as_plc_bool())
            .await
            .map_err(|e| e.into_gateway_error(&ctx.device_id))?;

        debug!(task_id = %ctx.task.task_id, device_id = %ctx.device_id, "outbound command triggered");
        Ok(())
    }

    async fn poll(
        &self,
        ctx: &CommandContext,
        reporter: Arc<OutcomeReporter>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let complete = ctx.signals.outbound_complete.clone();
        run_poll_loop(ctx, &reporter, &cancel, &complete, &NoopTick).await
    }
}
