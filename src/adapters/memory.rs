//! In-memory adapters.
//!
//! `InMemoryShardStore` simulates a fleet of disks, including offline
//! participants, corrupted shards, injected transient failures and
//! per-disk capacity. `InMemoryMetadataStore` keeps pool and catalog records
//! in maps. Both back the test suites and single-process experiments.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};

use crate::catalog::{ShardSet, ShardSetId};
use crate::domain::ports::{MetadataStore, ReachabilityProbe, ShardKey, ShardStore};
use crate::error::{Error, Result};
use crate::pool::types::{Participant, ParticipantId, PoolConfig};

// =============================================================================
// Shard Store
// =============================================================================

/// Capacity reported for disks nobody registered.
const UNBOUNDED_CAPACITY: u64 = u64::MAX / 2;

#[derive(Default)]
pub struct InMemoryShardStore {
    /// participant -> shard path -> bytes
    disks: DashMap<ParticipantId, DashMap<String, Bytes>>,
    capacity: DashMap<ParticipantId, u64>,
    offline: DashSet<ParticipantId>,
    /// participant -> remaining injected write failures
    failing_writes: DashMap<ParticipantId, u32>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every participant of a pool with its total size as capacity.
    pub fn register(&self, participants: &[Participant]) {
        for p in participants {
            self.capacity.insert(p.id(), p.total_bytes);
        }
    }

    pub fn set_capacity(&self, participant: &ParticipantId, bytes: u64) {
        self.capacity.insert(participant.clone(), bytes);
    }

    pub fn set_offline(&self, participant: &ParticipantId, offline: bool) {
        if offline {
            self.offline.insert(participant.clone());
        } else {
            self.offline.remove(participant);
        }
    }

    pub fn is_offline(&self, participant: &ParticipantId) -> bool {
        self.offline.contains(participant)
    }

    /// Make the next `count` writes to a participant fail transiently.
    pub fn fail_next_writes(&self, participant: &ParticipantId, count: u32) {
        self.failing_writes.insert(participant.clone(), count);
    }

    /// Flip the first byte of a stored shard.
    pub fn corrupt(&self, participant: &ParticipantId, key: &ShardKey) -> bool {
        let Some(disk) = self.disks.get(participant) else {
            return false;
        };
        let Some(mut entry) = disk.get_mut(&key.relative_path()) else {
            return false;
        };
        let mut bytes = entry.to_vec();
        if let Some(first) = bytes.first_mut() {
            *first ^= 0xff;
        }
        *entry = Bytes::from(bytes);
        true
    }

    /// Remove a shard behind the engine's back.
    pub fn lose(&self, participant: &ParticipantId, key: &ShardKey) -> bool {
        self.disks
            .get(participant)
            .is_some_and(|d| d.remove(&key.relative_path()).is_some())
    }

    pub fn has_shard(&self, participant: &ParticipantId, key: &ShardKey) -> bool {
        self.disks
            .get(participant)
            .is_some_and(|d| d.contains_key(&key.relative_path()))
    }

    pub fn shard_count(&self, participant: &ParticipantId) -> usize {
        self.disks.get(participant).map(|d| d.len()).unwrap_or(0)
    }

    pub fn total_shards(&self) -> usize {
        self.disks.iter().map(|d| d.len()).sum()
    }

    pub fn used_bytes(&self, participant: &ParticipantId) -> u64 {
        self.disks
            .get(participant)
            .map(|d| d.iter().map(|e| e.value().len() as u64).sum())
            .unwrap_or(0)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    fn ensure_online(&self, participant: &ParticipantId) -> Result<()> {
        if self.offline.contains(participant) {
            return Err(Error::transient(participant, "participant unreachable"));
        }
        Ok(())
    }

    fn capacity_of(&self, participant: &ParticipantId) -> u64 {
        self.capacity
            .get(participant)
            .map(|c| *c)
            .unwrap_or(UNBOUNDED_CAPACITY)
    }
}

#[async_trait]
impl ShardStore for InMemoryShardStore {
    async fn write_shard(
        &self,
        location: &ParticipantId,
        key: &ShardKey,
        bytes: Bytes,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.ensure_online(location)?;

        if let Some(mut remaining) = self.failing_writes.get_mut(location) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::transient(location, "injected write failure"));
            }
        }

        let path = key.relative_path();
        let existing = self
            .disks
            .get(location)
            .and_then(|d| d.get(&path).map(|b| b.len() as u64))
            .unwrap_or(0);
        let free = self
            .capacity_of(location)
            .saturating_sub(self.used_bytes(location));
        if bytes.len() as u64 > free + existing {
            return Err(Error::Io(std::io::Error::other(format!(
                "no space left on {}",
                location
            ))));
        }

        self.disks
            .entry(location.clone())
            .or_default()
            .insert(path, bytes);
        Ok(())
    }

    async fn read_shard(&self, location: &ParticipantId, key: &ShardKey) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.ensure_online(location)?;

        Ok(self
            .disks
            .get(location)
            .and_then(|d| d.get(&key.relative_path()).map(|b| b.clone())))
    }

    async fn delete_shard(&self, location: &ParticipantId, key: &ShardKey) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.ensure_online(location)?;

        Ok(self
            .disks
            .get(location)
            .is_some_and(|d| d.remove(&key.relative_path()).is_some()))
    }

    async fn free_bytes(&self, location: &ParticipantId) -> Result<u64> {
        self.ensure_online(location)?;
        Ok(self
            .capacity_of(location)
            .saturating_sub(self.used_bytes(location)))
    }
}

#[async_trait]
impl ReachabilityProbe for InMemoryShardStore {
    async fn probe(&self, participant: &ParticipantId) -> bool {
        !self.offline.contains(participant)
    }
}

// =============================================================================
// Metadata Store
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    pools: DashMap<String, PoolConfig>,
    shard_sets: DashMap<String, DashMap<ShardSetId, ShardSet>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load_pools(&self) -> Result<Vec<PoolConfig>> {
        let mut pools: Vec<PoolConfig> = self.pools.iter().map(|p| p.value().clone()).collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(pools)
    }

    async fn save_pool(&self, pool: &PoolConfig) -> Result<()> {
        self.pools.insert(pool.name.clone(), pool.clone());
        Ok(())
    }

    async fn delete_pool(&self, name: &str) -> Result<()> {
        self.pools.remove(name);
        Ok(())
    }

    async fn load_shard_sets(&self, pool: &str) -> Result<Vec<ShardSet>> {
        Ok(self
            .shard_sets
            .get(pool)
            .map(|sets| sets.iter().map(|s| s.value().clone()).collect())
            .unwrap_or_default())
    }

    async fn save_shard_set(&self, set: &ShardSet) -> Result<()> {
        self.shard_sets
            .entry(set.pool.clone())
            .or_default()
            .insert(set.id, set.clone());
        Ok(())
    }

    async fn delete_shard_set(&self, pool: &str, id: &ShardSetId) -> Result<()> {
        if let Some(sets) = self.shard_sets.get(pool) {
            sets.remove(id);
        }
        Ok(())
    }

    async fn delete_pool_catalog(&self, pool: &str) -> Result<()> {
        self.shard_sets.remove(pool);
        Ok(())
    }
}
