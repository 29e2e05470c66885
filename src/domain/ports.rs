//! Domain Ports (Port/Adapter Pattern)
//!
//! The engine reaches disks, metadata storage, reachability signals and event
//! sinks only through these traits. Adapters live in [`crate::adapters`].
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Engine Core                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  ShardStore │ MetadataStore │ ReachabilityProbe     │    │
//! │  │  EventPublisher │ TopologyObserver                  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  LocalDiskStore │ InMemoryShardStore │ JsonMetadataStore    │
//! │  LoggingEventPublisher │ InMemoryEventCollector             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::events::DomainEvent;
use crate::catalog::{ShardSet, ShardSetId};
use crate::error::Result;
use crate::pool::types::{ParticipantId, PoolConfig};
use crate::rebalance::PlanOutcome;

// =============================================================================
// Value Objects
// =============================================================================

/// Address of one shard copy on a participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    pub pool: String,
    pub shard_set: ShardSetId,
    pub index: usize,
}

impl ShardKey {
    pub fn new(pool: impl Into<String>, shard_set: ShardSetId, index: usize) -> Self {
        Self {
            pool: pool.into(),
            shard_set,
            index,
        }
    }

    /// `<pool>/<shard set>/<index>.shard`
    pub fn relative_path(&self) -> String {
        format!("{}/{}/{}.shard", self.pool, self.shard_set, self.index)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.shard_set, self.index)
    }
}

// =============================================================================
// Shard Store Port
// =============================================================================

/// Raw shard I/O against node disks.
///
/// Implementations report retryable failures as
/// [`Error::TransientIo`](crate::error::Error::TransientIo); callers retry
/// those with backoff.
#[async_trait]
pub trait ShardStore: Send + Sync {
    /// Durably store a shard copy, replacing any previous copy.
    async fn write_shard(&self, location: &ParticipantId, key: &ShardKey, bytes: Bytes)
        -> Result<()>;

    /// Read a shard copy; `None` if the participant has no copy.
    async fn read_shard(&self, location: &ParticipantId, key: &ShardKey) -> Result<Option<Bytes>>;

    /// Remove a shard copy; returns whether one existed.
    async fn delete_shard(&self, location: &ParticipantId, key: &ShardKey) -> Result<bool>;

    /// Current free bytes on the participant's disk.
    async fn free_bytes(&self, location: &ParticipantId) -> Result<u64>;
}

// =============================================================================
// Metadata Store Port
// =============================================================================

/// Durable storage for pool definitions and the file catalog.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load_pools(&self) -> Result<Vec<PoolConfig>>;

    async fn save_pool(&self, pool: &PoolConfig) -> Result<()>;

    async fn delete_pool(&self, name: &str) -> Result<()>;

    async fn load_shard_sets(&self, pool: &str) -> Result<Vec<ShardSet>>;

    async fn save_shard_set(&self, set: &ShardSet) -> Result<()>;

    async fn delete_shard_set(&self, pool: &str, id: &ShardSetId) -> Result<()>;

    /// Drop every catalog record of a pool.
    async fn delete_pool_catalog(&self, pool: &str) -> Result<()>;
}

// =============================================================================
// Reachability Port
// =============================================================================

/// Raw up/down signal for a participant.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, participant: &ParticipantId) -> bool;
}

// =============================================================================
// Topology Observer Port
// =============================================================================

/// Told about every participant change while the pool lock is held.
#[async_trait]
pub trait TopologyObserver: Send + Sync {
    async fn topology_changed(&self, pool: &PoolConfig) -> PlanOutcome;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_key_path() {
        let id = ShardSetId::new();
        let key = ShardKey::new("archive", id, 3);
        assert_eq!(key.relative_path(), format!("archive/{}/3.shard", id));
        assert!(key.to_string().ends_with("#3"));
    }
}
