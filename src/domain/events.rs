//! Domain Events
//!
//! Immutable records of things that happened to pools, participants, objects
//! and rebalance runs. Published through the [`EventPublisher`] port for audit
//! logging and for the administrative layer.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::object_stored("archive", "report.pdf", set_id, 1_048_576);
//! event_publisher.publish(event).await?;
//! ```
//!
//! [`EventPublisher`]: super::ports::EventPublisher

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain event representing a significant occurrence in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    // =========================================================================
    // Pool Events
    // =========================================================================
    PoolCreated {
        pool: String,
        data_shards: usize,
        parity_shards: usize,
        strategy: String,
        participants: usize,
        timestamp: DateTime<Utc>,
    },

    PoolDeleted {
        pool: String,
        forced: bool,
        orphaned_objects: usize,
        timestamp: DateTime<Utc>,
    },

    StrategyChanged {
        pool: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    ParticipantAdded {
        pool: String,
        participant: String,
        timestamp: DateTime<Utc>,
    },

    ParticipantRemoved {
        pool: String,
        participant: String,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Health Events
    // =========================================================================
    ParticipantStateChanged {
        participant: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },

    PoolHealthChanged {
        pool: String,
        from: String,
        to: String,
        down: usize,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Object Events
    // =========================================================================
    ObjectStored {
        pool: String,
        object: String,
        shard_set: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    ObjectDeleted {
        pool: String,
        object: String,
        timestamp: DateTime<Utc>,
    },

    ObjectDegradedRead {
        pool: String,
        object: String,
        missing_shards: Vec<usize>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ObjectLost {
        pool: String,
        object: String,
        available: usize,
        required: usize,
        timestamp: DateTime<Utc>,
    },

    // =========================================================================
    // Rebalance Events
    // =========================================================================
    ShardMoved {
        pool: String,
        shard_set: String,
        index: usize,
        from: String,
        to: String,
        reconstructed: bool,
        timestamp: DateTime<Utc>,
    },

    RebalanceFinished {
        pool: String,
        state: String,
        committed: usize,
        failed: usize,
        dropped: usize,
        bytes_moved: u64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::PoolCreated { timestamp, .. }
            | DomainEvent::PoolDeleted { timestamp, .. }
            | DomainEvent::StrategyChanged { timestamp, .. }
            | DomainEvent::ParticipantAdded { timestamp, .. }
            | DomainEvent::ParticipantRemoved { timestamp, .. }
            | DomainEvent::ParticipantStateChanged { timestamp, .. }
            | DomainEvent::PoolHealthChanged { timestamp, .. }
            | DomainEvent::ObjectStored { timestamp, .. }
            | DomainEvent::ObjectDeleted { timestamp, .. }
            | DomainEvent::ObjectDegradedRead { timestamp, .. }
            | DomainEvent::ObjectLost { timestamp, .. }
            | DomainEvent::ShardMoved { timestamp, .. }
            | DomainEvent::RebalanceFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::PoolCreated { .. } => "PoolCreated",
            DomainEvent::PoolDeleted { .. } => "PoolDeleted",
            DomainEvent::StrategyChanged { .. } => "StrategyChanged",
            DomainEvent::ParticipantAdded { .. } => "ParticipantAdded",
            DomainEvent::ParticipantRemoved { .. } => "ParticipantRemoved",
            DomainEvent::ParticipantStateChanged { .. } => "ParticipantStateChanged",
            DomainEvent::PoolHealthChanged { .. } => "PoolHealthChanged",
            DomainEvent::ObjectStored { .. } => "ObjectStored",
            DomainEvent::ObjectDeleted { .. } => "ObjectDeleted",
            DomainEvent::ObjectDegradedRead { .. } => "ObjectDegradedRead",
            DomainEvent::ObjectLost { .. } => "ObjectLost",
            DomainEvent::ShardMoved { .. } => "ShardMoved",
            DomainEvent::RebalanceFinished { .. } => "RebalanceFinished",
        }
    }

    /// Get the pool name if applicable.
    pub fn pool(&self) -> Option<&str> {
        match self {
            DomainEvent::PoolCreated { pool, .. }
            | DomainEvent::PoolDeleted { pool, .. }
            | DomainEvent::StrategyChanged { pool, .. }
            | DomainEvent::ParticipantAdded { pool, .. }
            | DomainEvent::ParticipantRemoved { pool, .. }
            | DomainEvent::PoolHealthChanged { pool, .. }
            | DomainEvent::ObjectStored { pool, .. }
            | DomainEvent::ObjectDeleted { pool, .. }
            | DomainEvent::ObjectDegradedRead { pool, .. }
            | DomainEvent::ObjectLost { pool, .. }
            | DomainEvent::ShardMoved { pool, .. }
            | DomainEvent::RebalanceFinished { pool, .. } => Some(pool),
            DomainEvent::ParticipantStateChanged { .. } => None,
        }
    }
}

// =============================================================================
// Event Builders
// =============================================================================

impl DomainEvent {
    pub fn object_stored(
        pool: impl Into<String>,
        object: impl Into<String>,
        shard_set: impl ToString,
        size_bytes: u64,
    ) -> Self {
        DomainEvent::ObjectStored {
            pool: pool.into(),
            object: object.into(),
            shard_set: shard_set.to_string(),
            size_bytes,
            timestamp: Utc::now(),
        }
    }

    pub fn degraded_read(
        pool: impl Into<String>,
        object: impl Into<String>,
        missing_shards: Vec<usize>,
        duration: Duration,
    ) -> Self {
        DomainEvent::ObjectDegradedRead {
            pool: pool.into(),
            object: object.into(),
            missing_shards,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    pub fn participant_state_changed(
        participant: impl ToString,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        DomainEvent::ParticipantStateChanged {
            participant: participant.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn pool_health_changed(
        pool: impl Into<String>,
        from: impl ToString,
        to: impl ToString,
        down: usize,
    ) -> Self {
        DomainEvent::PoolHealthChanged {
            pool: pool.into(),
            from: from.to_string(),
            to: to.to_string(),
            down,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
