//! Config store: the durable, validated record of every pool definition.
//!
//! Mutations of one pool are serialized by a per-pool lock that is held for
//! validation, persistence and the topology notification, never for the
//! execution of the rebalance plan that notification produces.
//!
//! A participant belongs to exactly one pool. Membership changes that could
//! claim a participant (create, add) take a store-wide lock first, then the
//! pool lock.
//!
//! Object writes enter through [`ConfigStore::admit_write`], a shared hold on
//! the pool's write gate; `delete` takes the gate exclusively so it never
//! races an in-flight put.

use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock as GateLock};
use tracing::{debug, info, instrument, warn};

use super::types::{
    validate_scope, Participant, ParticipantId, PlacementStrategy, PoolConfig, PoolSpec,
};
use crate::catalog::{FileCatalog, ShardSet};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, MetadataStore, TopologyObserver};
use crate::error::{Error, Result};
use crate::rebalance::PlanOutcome;

/// Result of adding or removing a participant.
#[derive(Debug, Clone, Serialize)]
pub struct TopologyChange {
    pub pool: PoolConfig,
    /// What the rebalance side made of the change; `None` without an observer
    pub outcome: Option<PlanOutcome>,
}

/// Result of deleting a pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolDeletion {
    pub pool: String,
    pub forced: bool,
    pub orphaned_objects: usize,
    pub orphaned_shards: usize,
    /// Catalog records that were dropped; their shard files are garbage
    #[serde(skip)]
    pub orphaned: Vec<ShardSet>,
}

pub struct ConfigStore {
    pools: DashMap<String, PoolConfig>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    write_gates: DashMap<String, Arc<GateLock<()>>>,
    membership: Mutex<()>,
    store: Arc<dyn MetadataStore>,
    catalog: Arc<FileCatalog>,
    events: Arc<dyn EventPublisher>,
    observer: RwLock<Option<Weak<dyn TopologyObserver>>>,
}

impl ConfigStore {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        catalog: Arc<FileCatalog>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            pools: DashMap::new(),
            locks: DashMap::new(),
            write_gates: DashMap::new(),
            membership: Mutex::new(()),
            store,
            catalog,
            events,
            observer: RwLock::new(None),
        }
    }

    /// Register who is told about participant changes.
    pub fn set_observer(&self, observer: Weak<dyn TopologyObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Load every persisted pool and its catalog.
    pub async fn load(&self) -> Result<usize> {
        let pools = self.store.load_pools().await?;
        for pool in &pools {
            self.catalog.load(&pool.name).await?;
            self.pools.insert(pool.name.clone(), pool.clone());
        }
        info!("Loaded {} pools", pools.len());
        Ok(pools.len())
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn write_gate(&self, name: &str) -> Arc<GateLock<()>> {
        self.write_gates
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(GateLock::new(())))
            .clone()
    }

    /// Admit one object write into a pool. While the returned guard lives
    /// the pool cannot be deleted.
    pub async fn admit_write(&self, name: &str) -> Result<OwnedRwLockReadGuard<()>> {
        self.get(name)?;
        let gate = self.write_gate(name);
        let admitted = gate.clone().read_owned().await;
        // the pool may have been deleted (and even recreated) while we waited
        self.get(name)?;
        let current = self.write_gates.get(name).map(|g| Arc::ptr_eq(g.value(), &gate));
        if current != Some(true) {
            return Err(Error::PoolNotFound(name.to_string()));
        }
        Ok(admitted)
    }

    /// The pool, other than `except`, that already owns `participant`.
    fn owner_of(&self, participant: &ParticipantId, except: &str) -> Option<String> {
        self.pools
            .iter()
            .find(|p| p.key() != except && p.value().contains(participant))
            .map(|p| p.key().clone())
    }

    fn check_unclaimed<'a>(
        &self,
        pool: &str,
        participants: impl IntoIterator<Item = &'a Participant>,
    ) -> Result<()> {
        for participant in participants {
            let id = participant.id();
            if let Some(owner) = self.owner_of(&id, pool) {
                return Err(Error::Validation(format!(
                    "participant {} already belongs to pool {}",
                    id, owner
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<PoolConfig> {
        self.pools
            .get(name)
            .map(|p| p.clone())
            .ok_or_else(|| Error::PoolNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Every pool, ordered by name.
    pub fn list(&self) -> Vec<PoolConfig> {
        let mut pools: Vec<PoolConfig> = self.pools.iter().map(|p| p.value().clone()).collect();
        pools.sort_by(|a, b| a.name.cmp(&b.name));
        pools
    }

    /// Validate and persist a new pool. Nothing is stored on failure.
    #[instrument(skip(self, spec), fields(pool = %spec.name))]
    pub async fn create(&self, spec: PoolSpec) -> Result<PoolConfig> {
        spec.validate()?;

        let _membership = self.membership.lock().await;
        let lock = self.lock_for(&spec.name);
        let _held = lock.lock().await;

        if self.pools.contains_key(&spec.name) {
            return Err(Error::PoolAlreadyExists(spec.name));
        }
        self.check_unclaimed(&spec.name, &spec.participants)?;

        let config = PoolConfig::from_spec(spec);
        self.store.save_pool(&config).await?;
        self.catalog.open_pool(&config.name);
        self.pools.insert(config.name.clone(), config.clone());

        info!(
            "Created pool {} ({}+{}, {}, {} participants on {} nodes)",
            config.name,
            config.data_shards,
            config.parity_shards,
            config.strategy,
            config.participants.len(),
            config.nodes().len()
        );
        self.publish(DomainEvent::PoolCreated {
            pool: config.name.clone(),
            data_shards: config.data_shards,
            parity_shards: config.parity_shards,
            strategy: config.strategy.to_string(),
            participants: config.participants.len(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(config)
    }

    /// Change the strategy used for future ShardSets. Existing shards stay put.
    #[instrument(skip(self))]
    pub async fn update_strategy(
        &self,
        name: &str,
        strategy: PlacementStrategy,
    ) -> Result<PoolConfig> {
        let lock = self.lock_for(name);
        let _held = lock.lock().await;

        let mut config = self.get(name)?;
        let previous = config.strategy;
        if previous == strategy {
            return Ok(config);
        }
        config.strategy = strategy;
        config.cursor = 0;
        config.touch();
        self.persist(&config).await?;

        info!("Pool {} strategy {} -> {}", name, previous, strategy);
        self.publish(DomainEvent::StrategyChanged {
            pool: name.to_string(),
            from: previous.to_string(),
            to: strategy.to_string(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(config)
    }

    /// Add a disk to a pool and let the observer plan around it.
    #[instrument(skip(self, participant), fields(participant = %participant.id()))]
    pub async fn add_participant(
        &self,
        name: &str,
        participant: Participant,
    ) -> Result<TopologyChange> {
        let membership = self.membership.lock().await;
        let lock = self.lock_for(name);
        let _held = lock.lock().await;

        let mut config = self.get(name)?;
        let id = participant.id();
        if config.contains(&id) {
            return Err(Error::Validation(format!(
                "participant {} is already part of pool {}",
                id, name
            )));
        }
        self.check_unclaimed(name, [&participant])?;

        let mut participants = config.participants.clone();
        participants.push(participant);
        validate_scope(config.scope, &participants)?;

        config.participants = participants;
        config.touch();
        self.persist(&config).await?;
        drop(membership);

        info!("Added {} to pool {}", id, name);
        self.publish(DomainEvent::ParticipantAdded {
            pool: name.to_string(),
            participant: id.to_string(),
            timestamp: Utc::now(),
        })
        .await;

        let outcome = self.notify(&config).await;
        Ok(TopologyChange {
            pool: config,
            outcome,
        })
    }

    /// Remove a disk from a pool.
    ///
    /// The pool may drop below k+m participants; that only degrades health
    /// and placement, it does not make the definition invalid.
    #[instrument(skip(self))]
    pub async fn remove_participant(
        &self,
        name: &str,
        participant: &ParticipantId,
    ) -> Result<TopologyChange> {
        let lock = self.lock_for(name);
        let _held = lock.lock().await;

        let mut config = self.get(name)?;
        let position = config
            .participants
            .iter()
            .position(|p| p.is(participant))
            .ok_or_else(|| Error::ParticipantNotFound {
                pool: name.to_string(),
                participant: participant.to_string(),
            })?;

        config.participants.remove(position);
        config.touch();
        self.persist(&config).await?;

        if config.participants.len() < config.total_shards() {
            warn!(
                "Pool {} now has {} participants, below {}+{}; new writes will be refused",
                name,
                config.participants.len(),
                config.data_shards,
                config.parity_shards
            );
        } else {
            info!("Removed {} from pool {}", participant, name);
        }
        self.publish(DomainEvent::ParticipantRemoved {
            pool: name.to_string(),
            participant: participant.to_string(),
            timestamp: Utc::now(),
        })
        .await;

        let outcome = self.notify(&config).await;
        Ok(TopologyChange {
            pool: config,
            outcome,
        })
    }

    /// Apply fresh size and status figures reported by the inventory.
    /// Reports for disks outside the pool are ignored.
    pub async fn refresh_inventory(&self, name: &str, reports: &[Participant]) -> Result<PoolConfig> {
        let lock = self.lock_for(name);
        let _held = lock.lock().await;

        let mut config = self.get(name)?;
        let mut updated = 0;
        for report in reports {
            match config.participant_mut(&report.id()) {
                Some(p) => {
                    p.total_bytes = report.total_bytes;
                    p.free_bytes = report.free_bytes.min(report.total_bytes);
                    p.status = report.status;
                    updated += 1;
                }
                None => debug!("Ignoring inventory for {} outside pool {}", report.id(), name),
            }
        }
        if updated > 0 {
            config.updated_at = Utc::now();
            self.persist(&config).await?;
        }
        Ok(config)
    }

    /// Persist the placement cursor after a ShardSet was committed.
    pub async fn advance_cursor(&self, name: &str, cursor: u64) -> Result<()> {
        let lock = self.lock_for(name);
        let _held = lock.lock().await;

        let mut config = self.get(name)?;
        if config.cursor == cursor {
            return Ok(());
        }
        config.cursor = cursor;
        self.persist(&config).await
    }

    /// Adjust the free-space estimates after shards were written or deleted.
    pub async fn adjust_free_space(
        &self,
        name: &str,
        consumed: &[(ParticipantId, u64)],
        released: &[(ParticipantId, u64)],
    ) -> Result<()> {
        if consumed.is_empty() && released.is_empty() {
            return Ok(());
        }
        let lock = self.lock_for(name);
        let _held = lock.lock().await;

        let mut config = self.get(name)?;
        for (id, bytes) in consumed {
            if let Some(p) = config.participant_mut(id) {
                p.free_bytes = p.free_bytes.saturating_sub(*bytes);
            }
        }
        for (id, bytes) in released {
            if let Some(p) = config.participant_mut(id) {
                p.free_bytes = p.free_bytes.saturating_add(*bytes).min(p.total_bytes);
            }
        }
        self.persist(&config).await
    }

    /// Delete a pool. Without `force` the pool must hold no objects.
    ///
    /// Waits for admitted object writes to finish; writes arriving later
    /// fail with `PoolNotFound`.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str, force: bool) -> Result<PoolDeletion> {
        let gate = self.write_gate(name);
        let _drained = gate.write().await;
        let lock = self.lock_for(name);
        let held = lock.lock().await;

        self.get(name)?;
        let objects = self.catalog.object_count(name);
        if objects > 0 && !force {
            return Err(Error::PoolInUse {
                pool: name.to_string(),
                objects,
            });
        }

        let orphaned = self.catalog.purge_pool(name).await?;
        self.store.delete_pool(name).await?;
        self.pools.remove(name);
        drop(held);
        self.locks.remove(name);
        self.write_gates.remove(name);

        let orphaned_shards = orphaned.iter().map(|s| s.shards.len()).sum();
        if orphaned.is_empty() {
            info!("Deleted pool {}", name);
        } else {
            warn!(
                "Force-deleted pool {}: {} objects ({} shards) are now unrecoverable",
                name,
                orphaned.len(),
                orphaned_shards
            );
        }
        self.publish(DomainEvent::PoolDeleted {
            pool: name.to_string(),
            forced: force,
            orphaned_objects: orphaned.len(),
            timestamp: Utc::now(),
        })
        .await;

        Ok(PoolDeletion {
            pool: name.to_string(),
            forced: force,
            orphaned_objects: orphaned.len(),
            orphaned_shards,
            orphaned,
        })
    }

    async fn persist(&self, config: &PoolConfig) -> Result<()> {
        self.store.save_pool(config).await?;
        self.pools.insert(config.name.clone(), config.clone());
        Ok(())
    }

    /// Hand the new topology to the observer. Called with the pool lock held.
    async fn notify(&self, config: &PoolConfig) -> Option<PlanOutcome> {
        let observer = self.observer.read().as_ref().and_then(Weak::upgrade)?;
        let outcome = observer.topology_changed(config).await;
        debug!("Topology change on {} -> {:?}", config.name, outcome);
        Some(outcome)
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish pool event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryMetadataStore};
    use crate::ec::ErasureCodec;
    use crate::pool::types::{DiskStatus, PoolScope};
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    fn disks(n: usize) -> Vec<Participant> {
        (0..n)
            .map(|i| Participant::new(format!("node{}", i), "/data", 1000, 800))
            .collect()
    }

    fn disks_on(mount: &str, n: usize) -> Vec<Participant> {
        (0..n)
            .map(|i| Participant::new(format!("node{}", i), mount, 1000, 800))
            .collect()
    }

    fn fixture() -> (
        ConfigStore,
        Arc<InMemoryMetadataStore>,
        Arc<FileCatalog>,
        Arc<InMemoryEventCollector>,
    ) {
        let meta = Arc::new(InMemoryMetadataStore::new());
        let catalog = Arc::new(FileCatalog::new(meta.clone()));
        let events = Arc::new(InMemoryEventCollector::new());
        (
            ConfigStore::new(meta.clone(), catalog.clone(), events.clone()),
            meta,
            catalog,
            events,
        )
    }

    /// Records the topologies it was shown and whether the pool lock was held.
    #[derive(Default)]
    struct Recorder {
        seen: parking_lot::Mutex<Vec<(usize, bool)>>,
        store: parking_lot::Mutex<Option<Weak<ConfigStore>>>,
    }

    #[async_trait]
    impl TopologyObserver for Recorder {
        async fn topology_changed(&self, pool: &PoolConfig) -> PlanOutcome {
            let locked = self
                .store
                .lock()
                .as_ref()
                .and_then(Weak::upgrade)
                .map(|s| s.lock_for(&pool.name).try_lock().is_err())
                .unwrap_or(false);
            self.seen.lock().push((pool.participants.len(), locked));
            PlanOutcome::Compliant
        }
    }

    #[tokio::test]
    async fn test_create_validates_before_storing() {
        let (store, meta, _, events) = fixture();

        assert_matches!(
            store.create(PoolSpec::new("p", 4, 2, disks(5))).await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            store.create(PoolSpec::new("bad name", 1, 0, disks(1))).await,
            Err(Error::Validation(_))
        );
        assert!(meta.load_pools().await.unwrap().is_empty());

        let pool = store.create(PoolSpec::new("p", 4, 2, disks(6))).await.unwrap();
        assert_eq!(pool.generation, 1);
        assert_eq!(meta.load_pools().await.unwrap().len(), 1);
        assert_eq!(events.events_of_type("PoolCreated").len(), 1);

        assert_matches!(
            store.create(PoolSpec::new("p", 4, 2, disks(6))).await,
            Err(Error::PoolAlreadyExists(_))
        );
    }

    #[tokio::test]
    async fn test_load_restores_pools() {
        let (store, meta, catalog, _) = fixture();
        store.create(PoolSpec::new("b", 2, 1, disks(3))).await.unwrap();
        store
            .create(PoolSpec::new("a", 2, 1, disks_on("/spare", 3)))
            .await
            .unwrap();

        let fresh = ConfigStore::new(meta, catalog, Arc::new(InMemoryEventCollector::new()));
        assert_eq!(fresh.load().await.unwrap(), 2);
        let names: Vec<_> = fresh.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_participant_changes_notify_under_lock() {
        let (store, _, _, events) = fixture();
        let store = Arc::new(store);
        let recorder = Arc::new(Recorder::default());
        *recorder.store.lock() = Some(Arc::downgrade(&store));
        let observer: Arc<dyn TopologyObserver> = recorder.clone();
        store.set_observer(Arc::downgrade(&observer));

        store.create(PoolSpec::new("p", 2, 1, disks(3))).await.unwrap();
        let change = store
            .add_participant("p", Participant::new("node9", "/data", 1000, 1000))
            .await
            .unwrap();
        assert_eq!(change.outcome, Some(PlanOutcome::Compliant));
        assert_eq!(change.pool.generation, 2);

        let removed = ParticipantId::new("node0", "/data");
        store.remove_participant("p", &removed).await.unwrap();

        assert_eq!(*recorder.seen.lock(), vec![(4, true), (3, true)]);
        assert_eq!(events.events_of_type("ParticipantAdded").len(), 1);
        assert_eq!(events.events_of_type("ParticipantRemoved").len(), 1);
    }

    #[tokio::test]
    async fn test_participant_validation() {
        let (store, _, _, _) = fixture();
        store.create(PoolSpec::new("p", 2, 1, disks(3))).await.unwrap();

        assert_matches!(
            store.add_participant("p", disks(1).remove(0)).await,
            Err(Error::Validation(_))
        );
        assert_matches!(
            store
                .remove_participant("p", &ParticipantId::new("ghost", "/data"))
                .await,
            Err(Error::ParticipantNotFound { .. })
        );

        let single = (0..3)
            .map(|i| Participant::new("solo", format!("/d{}", i), 1000, 1000))
            .collect();
        store
            .create(PoolSpec::new("s", 2, 1, single).with_scope(PoolScope::SingleNode))
            .await
            .unwrap();
        assert_matches!(
            store
                .add_participant("s", Participant::new("other", "/d0", 1000, 1000))
                .await,
            Err(Error::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_participant_owned_by_one_pool() {
        let (store, meta, _, _) = fixture();
        store.create(PoolSpec::new("a", 2, 1, disks(3))).await.unwrap();

        let mut overlapping = disks_on("/other", 2);
        overlapping.push(Participant::new("node1", "/data", 1000, 800));
        let err = store
            .create(PoolSpec::new("b", 2, 1, overlapping))
            .await
            .unwrap_err();
        assert_matches!(&err, Error::Validation(msg) if msg.contains("pool a"));
        assert!(!store.contains("b"));
        assert_eq!(meta.load_pools().await.unwrap().len(), 1);

        store
            .create(PoolSpec::new("b", 2, 1, disks_on("/other", 3)))
            .await
            .unwrap();
        assert_matches!(
            store
                .add_participant("b", Participant::new("node2", "/data", 1000, 800))
                .await,
            Err(Error::Validation(_))
        );
        assert_eq!(store.get("b").unwrap().participants.len(), 3);

        // a removed participant is free to join another pool
        let moved = ParticipantId::new("node2", "/data");
        store.remove_participant("a", &moved).await.unwrap();
        let change = store
            .add_participant("b", Participant::new("node2", "/data", 1000, 800))
            .await
            .unwrap();
        assert!(change.pool.contains(&moved));
    }

    #[tokio::test]
    async fn test_delete_waits_for_admitted_writes() {
        let (store, _, _, _) = fixture();
        let store = Arc::new(store);
        store.create(PoolSpec::new("p", 2, 1, disks(3))).await.unwrap();

        let admitted = store.admit_write("p").await.unwrap();
        let deleting = tokio::spawn({
            let store = store.clone();
            async move { store.delete("p", false).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!deleting.is_finished());
        assert!(store.contains("p"));

        // queued behind the delete; must not slip into a recreated pool
        let late = tokio::spawn({
            let store = store.clone();
            async move { store.admit_write("p").await.map(|_| ()) }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        drop(admitted);
        let deletion = deleting.await.unwrap().unwrap();
        assert_eq!(deletion.orphaned_objects, 0);
        assert_matches!(late.await.unwrap(), Err(Error::PoolNotFound(_)));
        assert_matches!(store.admit_write("p").await, Err(Error::PoolNotFound(_)));

        store.create(PoolSpec::new("p", 2, 1, disks(3))).await.unwrap();
        assert!(store.admit_write("p").await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_may_drop_below_threshold() {
        let (store, _, _, _) = fixture();
        store.create(PoolSpec::new("p", 4, 2, disks(6))).await.unwrap();
        let change = store
            .remove_participant("p", &ParticipantId::new("node5", "/data"))
            .await
            .unwrap();
        assert_eq!(change.pool.participants.len(), 5);
        assert!(change.outcome.is_none());
    }

    #[tokio::test]
    async fn test_update_strategy_resets_cursor() {
        let (store, _, _, events) = fixture();
        store.create(PoolSpec::new("p", 2, 1, disks(3))).await.unwrap();
        store.advance_cursor("p", 7).await.unwrap();

        let pool = store
            .update_strategy("p", PlacementStrategy::RoundRobin)
            .await
            .unwrap();
        assert_eq!(pool.strategy, PlacementStrategy::RoundRobin);
        assert_eq!(pool.cursor, 0);
        assert_eq!(events.events_of_type("StrategyChanged").len(), 1);
    }

    #[tokio::test]
    async fn test_inventory_and_free_space() {
        let (store, _, _, _) = fixture();
        store.create(PoolSpec::new("p", 2, 1, disks(3))).await.unwrap();
        let id = ParticipantId::new("node1", "/data");

        let mut report = Participant::new("node1", "/data", 2000, 1500);
        report.status = DiskStatus::Warning;
        let pool = store
            .refresh_inventory("p", &[report, Participant::new("x", "/y", 1, 1)])
            .await
            .unwrap();
        let p = pool.participant(&id).unwrap();
        assert_eq!((p.total_bytes, p.free_bytes, p.status), (2000, 1500, DiskStatus::Warning));

        store
            .adjust_free_space("p", &[(id.clone(), 600)], &[])
            .await
            .unwrap();
        assert_eq!(store.get("p").unwrap().participant(&id).unwrap().free_bytes, 900);
        store
            .adjust_free_space("p", &[], &[(id.clone(), 5000)])
            .await
            .unwrap();
        assert_eq!(store.get("p").unwrap().participant(&id).unwrap().free_bytes, 2000);
    }

    #[tokio::test]
    async fn test_delete_requires_force_when_in_use() {
        let (store, meta, catalog, events) = fixture();
        let pool = store.create(PoolSpec::new("p", 2, 1, disks(3))).await.unwrap();

        let codec = ErasureCodec::new(2, 1).unwrap();
        let encoded = codec.encode(b"payload").unwrap();
        let set =
            ShardSet::from_encoded("p", "obj", &encoded, &pool.participant_ids(), 2, 1).unwrap();
        catalog.commit(set).await.unwrap();

        let err = store.delete("p", false).await.unwrap_err();
        assert_matches!(err, Error::PoolInUse { objects: 1, .. });
        assert!(err.to_string().contains("export"));
        assert!(store.contains("p"));

        let report = store.delete("p", true).await.unwrap();
        assert_eq!((report.orphaned_objects, report.orphaned_shards), (1, 3));
        assert!(!store.contains("p"));
        assert!(meta.load_pools().await.unwrap().is_empty());
        assert_eq!(catalog.object_count("p"), 0);
        assert_eq!(events.events_of_type("PoolDeleted").len(), 1);

        assert_matches!(store.delete("p", true).await, Err(Error::PoolNotFound(_)));
    }
}
