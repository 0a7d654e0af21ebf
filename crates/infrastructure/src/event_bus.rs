//! In-process event bus
//!
//! Fan-out of gateway events to any number of subscribers over a tokio
//! broadcast channel. Publishing never blocks on slow subscribers; a lagging
//! receiver drops the oldest events, which is acceptable for status streams
//! and is why task outcomes are also pushed into the dispatcher directly.

use async_trait::async_trait;
use shuttle_domain::event_bus::{EventBusError, EventPublisher};
use shuttle_domain::events::GatewayEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Configuration for the in-memory event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

/// In-memory Event Bus
#[derive(Clone)]
pub struct InMemoryEventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl InMemoryEventBus {
    pub fn new(config: Option<EventBusConfig>) -> Self {
        let capacity = config.unwrap_or_default().channel_capacity;
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    /// Subscribe to every gateway event.
    pub fn subscribe_all(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: &GatewayEvent) -> Result<(), EventBusError> {
        // A send error only means there is no subscriber right now.
        let _ = self.tx.send(event.clone());
        debug!(event_type = event.event_type(), "published gateway event");
        Ok(())
    }
}
