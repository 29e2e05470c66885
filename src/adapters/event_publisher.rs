//! Event Publisher Adapters
//!
//! Sinks for [`DomainEvent`]s: the tracing log and an in-memory collector
//! used by tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::domain::events::DomainEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;

/// Writes every event to the tracing log as one JSON line.
///
/// Health and loss events are always logged at `warn`; the rest at `info`
/// or `debug` depending on how the publisher was built.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    info_level: bool,
}

impl LoggingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

fn is_alarming(event: &DomainEvent) -> bool {
    match event {
        DomainEvent::ObjectLost { .. } => true,
        DomainEvent::PoolHealthChanged { to, .. } => to != "healthy",
        DomainEvent::ParticipantStateChanged { to, .. } => to == "down",
        _ => false,
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event)?;

        if is_alarming(&event) {
            warn!(event_type = %event_type, event = %json, "Domain event");
        } else if self.info_level {
            info!(event_type = %event_type, event = %json, "Domain event");
        } else {
            debug!(event_type = %event_type, event = %json, "Domain event");
        }
        Ok(())
    }
}

/// Keeps events in memory for later inspection.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events whose `type` tag equals `event_type`, oldest first.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn events_for_pool(&self, pool: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.pool() == Some(pool))
            .cloned()
            .collect()
    }

    pub fn last(&self) -> Option<DomainEvent> {
        self.events.read().last().cloned()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        self.events.write().extend(events);
        Ok(())
    }
}
