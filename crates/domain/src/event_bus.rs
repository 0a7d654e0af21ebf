use crate::events::GatewayEvent;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {0}")]
    PublishError(String),
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),
}

/// Port for publishing gateway events to external subscribers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &GatewayEvent) -> Result<(), EventBusError>;
}

impl From<EventBusError> for crate::shared_kernel::GatewayError {
    fn from(err: EventBusError) -> Self {
        crate::shared_kernel::GatewayError::Unknown {
            message: err.to_string(),
        }
    }
}
