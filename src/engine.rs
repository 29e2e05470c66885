//! Pool Engine
//!
//! The facade the administrative layer talks to. It wires the components
//! together and owns the object write and read paths.
//!
//! ```text
//!  put_object:  encode ──▶ assign ──▶ write k+m shards ──▶ commit ──▶ visible
//!                                        │ any failure
//!                                        ▼
//!                                   roll back written shards
//!
//!  get_object:  read shards concurrently ──▶ first k valid ──▶ decode
//! ```
//!
//! A ShardSet is visible to readers only after every shard is durably
//! stored; a failed write deletes whatever it already wrote.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{FileCatalog, ShardHealth, ShardSet, ShardSetId, ShardStatus};
use crate::config::EngineConfig;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{
    EventPublisher, MetadataStore, ReachabilityProbe, ShardKey, ShardStore, TopologyObserver,
};
use crate::ec::{compute_capacity, storage_efficiency, storage_overhead, ErasureCodec};
use crate::error::{Error, Result};
use crate::health::{HealthMonitor, ParticipantState, PoolHealth, Transition};
use crate::metrics::EngineMetrics;
use crate::placement::PlacementPlanner;
use crate::pool::types::{
    DiskStatus, Participant, ParticipantId, PlacementStrategy, PoolConfig, PoolScope, PoolSpec,
};
use crate::pool::{ConfigStore, PoolDeletion, TopologyChange};
use crate::rebalance::{ExecutionReport, RebalanceEngine, RebalancePlan};
use crate::retry::RetryPolicy;

/// Longest object name accepted.
pub const MAX_OBJECT_NAME_LEN: usize = 1024;

// =============================================================================
// Status Types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantStatus {
    #[serde(flatten)]
    pub participant: Participant,
    pub state: ParticipantState,
}

/// Point-in-time view of one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub data_shards: usize,
    pub parity_shards: usize,
    pub strategy: PlacementStrategy,
    pub scope: PoolScope,
    pub health: PoolHealth,
    /// Data bytes that still fit: smallest free space of the k+m best live
    /// participants times k; zero when fewer than k+m are live
    pub usable_bytes: u64,
    /// Raw free bytes over live participants
    pub free_bytes: u64,
    pub participants: Vec<ParticipantStatus>,
    pub object_count: usize,
    pub logical_bytes: u64,
    pub storage_overhead: f64,
    pub storage_efficiency: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectSummary {
    pub name: String,
    pub size: u64,
    pub shard_set: ShardSetId,
    pub shard_health: ShardHealth,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Engine
// =============================================================================

pub struct PoolEngine {
    config: EngineConfig,
    retry: RetryPolicy,
    pools: Arc<ConfigStore>,
    catalog: Arc<FileCatalog>,
    shards: Arc<dyn ShardStore>,
    probe: Arc<dyn ReachabilityProbe>,
    health: Arc<HealthMonitor>,
    planner: PlacementPlanner,
    rebalance: Arc<RebalanceEngine>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<EngineMetrics>,
}

impl PoolEngine {
    /// Build the engine, load persisted pools and catalogs, and probe every
    /// participant once so health starts from fresh observations.
    pub async fn open(
        config: EngineConfig,
        shards: Arc<dyn ShardStore>,
        metadata: Arc<dyn MetadataStore>,
        probe: Arc<dyn ReachabilityProbe>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new()?);
        let catalog = Arc::new(FileCatalog::new(metadata.clone()));
        let pools = Arc::new(ConfigStore::new(metadata, catalog.clone(), events.clone()));
        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            events.clone(),
            metrics.clone(),
        ));
        let planner = PlacementPlanner::new(config.placement.fill_threshold_percent);
        let rebalance = RebalanceEngine::new(
            config.rebalance.clone(),
            config.retry.clone(),
            planner.clone(),
            pools.clone(),
            catalog.clone(),
            shards.clone(),
            health.clone(),
            events.clone(),
            metrics.clone(),
        );

        let observer: Arc<dyn TopologyObserver> = rebalance.clone();
        pools.set_observer(Arc::downgrade(&observer));

        let loaded = pools.load().await?;
        let known = pools.list();
        for pool in &known {
            health.track(pool);
        }
        health.probe_all(probe.as_ref(), &known).await;
        info!("Pool engine open with {} pools", loaded);

        Ok(Self {
            retry: config.retry.clone(),
            config,
            pools,
            catalog,
            shards,
            probe,
            health,
            planner,
            rebalance,
            events,
            metrics,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn catalog(&self) -> &Arc<FileCatalog> {
        &self.catalog
    }

    pub fn is_rebalancing(&self, pool: &str) -> bool {
        self.rebalance.is_running(pool)
    }

    /// Run one probe round over every pool right now.
    pub async fn probe_now(&self) -> Vec<Transition> {
        self.health
            .probe_all(self.probe.as_ref(), &self.pools.list())
            .await
    }

    // =========================================================================
    // Pool Administration
    // =========================================================================

    pub async fn create_pool(&self, spec: PoolSpec) -> Result<PoolConfig> {
        let config = self.pools.create(spec).await?;
        self.health.track(&config);
        self.health
            .probe_all(self.probe.as_ref(), std::slice::from_ref(&config))
            .await;
        Ok(config)
    }

    pub async fn update_strategy(
        &self,
        pool: &str,
        strategy: PlacementStrategy,
    ) -> Result<PoolConfig> {
        self.pools.update_strategy(pool, strategy).await
    }

    /// Add a disk. It is probed first so the rebalance plan triggered by the
    /// change already sees it as a live destination.
    pub async fn add_participant(
        &self,
        pool: &str,
        participant: Participant,
    ) -> Result<TopologyChange> {
        let id = participant.id();
        let reachable = self.probe.probe(&id).await;
        self.health.observe(&id, reachable, &[]).await;

        let change = self.pools.add_participant(pool, participant).await?;
        self.health.evaluate(&change.pool).await;
        Ok(change)
    }

    pub async fn remove_participant(
        &self,
        pool: &str,
        participant: &ParticipantId,
    ) -> Result<TopologyChange> {
        let change = self.pools.remove_participant(pool, participant).await?;
        self.health.evaluate(&change.pool).await;
        Ok(change)
    }

    pub async fn refresh_inventory(
        &self,
        pool: &str,
        reports: &[Participant],
    ) -> Result<PoolConfig> {
        self.pools.refresh_inventory(pool, reports).await
    }

    /// Delete a pool. With `force`, objects still in it are dropped and
    /// their shard files removed where the disk is reachable.
    pub async fn delete_pool(&self, pool: &str, force: bool) -> Result<PoolDeletion> {
        let config = self.pools.get(pool)?;
        let deletion = self.pools.delete(pool, force).await?;

        if !deletion.orphaned.is_empty() {
            warn!(
                "Force-deleted pool {} with {} objects; their data is gone",
                pool, deletion.orphaned_objects
            );
            let snapshot = self.health.snapshot();
            let mut removals = Vec::new();
            for set in &deletion.orphaned {
                for shard in &set.shards {
                    if !snapshot.is_down(&shard.location) {
                        removals.push((shard.location.clone(), set.key(shard.index)));
                    }
                }
            }
            let results = join_all(removals.iter().map(|(location, key)| async move {
                self.shards.delete_shard(location, key).await
            }))
            .await;
            let leftover = results.iter().filter(|r| r.is_err()).count();
            if leftover > 0 {
                warn!("{} shard files of pool {} could not be removed", leftover, pool);
            }
        }

        self.health.forget_pool(&config);
        Ok(deletion)
    }

    pub fn pool_status(&self, pool: &str) -> Result<PoolStatus> {
        let config = self.pools.get(pool)?;
        Ok(self.status_of(&config))
    }

    pub fn list_pools(&self) -> Vec<PoolStatus> {
        self.pools
            .list()
            .iter()
            .map(|config| self.status_of(config))
            .collect()
    }

    fn status_of(&self, config: &PoolConfig) -> PoolStatus {
        let snapshot = self.health.snapshot();
        let live: Vec<Participant> = config
            .participants
            .iter()
            .filter(|p| p.status != DiskStatus::Offline && !snapshot.is_down(&p.id()))
            .cloned()
            .collect();

        // fewer than k+m live participants hold no new data
        let usable_bytes = compute_capacity(&live, config.data_shards, config.parity_shards)
            .map(|c| c.usable_bytes)
            .unwrap_or(0);

        let participants = config
            .participants
            .iter()
            .map(|p| ParticipantStatus {
                state: self
                    .health
                    .participant_state(&p.id())
                    .unwrap_or(ParticipantState::Suspect),
                participant: p.clone(),
            })
            .collect();

        PoolStatus {
            name: config.name.clone(),
            data_shards: config.data_shards,
            parity_shards: config.parity_shards,
            strategy: config.strategy,
            scope: config.scope,
            health: snapshot.pool_health(config),
            usable_bytes,
            free_bytes: live.iter().map(|p| p.free_bytes).sum(),
            participants,
            object_count: self.catalog.object_count(&config.name),
            logical_bytes: self.catalog.logical_bytes(&config.name),
            storage_overhead: storage_overhead(config.data_shards, config.parity_shards),
            storage_efficiency: storage_efficiency(config.data_shards, config.parity_shards),
        }
    }

    // =========================================================================
    // Objects
    // =========================================================================

    /// Encode and store an object, replacing any previous version.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn put_object(&self, pool: &str, object: &str, data: Bytes) -> Result<ShardSet> {
        validate_object_name(object)?;
        // held until the set is committed so the pool cannot be deleted underneath
        let _admitted = self.pools.admit_write(pool).await?;
        let config = self.pools.get(pool)?;
        let snapshot = self.health.snapshot();

        let down = snapshot.down_count(&config);
        if snapshot.pool_health(&config) == PoolHealth::Unavailable {
            return Err(Error::PoolUnavailable {
                pool: pool.to_string(),
                down,
                tolerated: config.parity_shards,
            });
        }

        let codec = ErasureCodec::new(config.data_shards, config.parity_shards)?;
        let shard_len = codec.shard_len_for(data.len()) as u64;
        let placement = self.planner.assign(&config, &snapshot, shard_len)?;

        let timer = self.metrics.encode_seconds.start_timer();
        let encoded = tokio::task::spawn_blocking(move || codec.encode(&data))
            .await
            .map_err(|e| Error::Internal(format!("encode task failed: {}", e)))??;
        timer.observe_duration();

        let set = ShardSet::from_encoded(
            pool,
            object,
            &encoded,
            &placement.targets,
            config.data_shards,
            config.parity_shards,
        )?;

        let writes = encoded
            .shards
            .iter()
            .zip(&placement.targets)
            .map(|(shard, target)| {
                let key = set.key(shard.index);
                let bytes = shard.bytes.clone();
                async move {
                    let result = self
                        .retry
                        .run("write shard", || {
                            self.shards.write_shard(target, &key, bytes.clone())
                        })
                        .await;
                    (target, key, result)
                }
            });
        let results = join_all(writes).await;

        let mut written = Vec::new();
        let mut failure = None;
        for (target, key, result) in results {
            match result {
                Ok(()) => written.push((target.clone(), key)),
                Err(e) => {
                    self.metrics.shard_write_failures.inc();
                    warn!("Write of {} to {} failed: {}", key, target, e);
                    if e.is_retryable() {
                        self.health.escalate(target, &self.pools.list()).await;
                    }
                    failure.get_or_insert(e);
                }
            }
        }
        self.metrics.shard_writes.inc_by(written.len() as u64);

        if let Some(e) = failure {
            self.roll_back(object, &written).await;
            return Err(e);
        }

        let previous = match self.catalog.commit(set.clone()).await {
            Ok(previous) => previous,
            Err(e) => {
                self.roll_back(object, &written).await;
                return Err(e);
            }
        };

        if let Err(e) = self.pools.advance_cursor(pool, placement.next_cursor).await {
            warn!("Failed to persist placement cursor of {}: {}", pool, e);
        }

        let consumed: Vec<(ParticipantId, u64)> = placement
            .targets
            .iter()
            .map(|t| (t.clone(), set.shard_len))
            .collect();
        let released = match &previous {
            Some(old) => self.delete_shards(old).await,
            None => Vec::new(),
        };
        if let Err(e) = self
            .pools
            .adjust_free_space(pool, &consumed, &released)
            .await
        {
            warn!("Failed to update free space of {}: {}", pool, e);
        }

        self.metrics.objects_stored.inc();
        info!(
            "Stored {}/{} ({} bytes) as shard set {}{}",
            pool,
            object,
            set.object_size,
            set.id,
            if previous.is_some() { ", replacing the previous version" } else { "" }
        );
        self.publish(DomainEvent::object_stored(pool, object, set.id, set.object_size))
            .await;
        Ok(set)
    }

    /// Read an object back, reconstructing it from any k valid shards.
    #[instrument(skip(self))]
    pub async fn get_object(&self, pool: &str, object: &str) -> Result<Bytes> {
        self.pools.get(pool)?;
        let set = self
            .catalog
            .get(pool, object)
            .ok_or_else(|| Error::ObjectNotFound {
                pool: pool.to_string(),
                object: object.to_string(),
            })?;

        let started = Instant::now();
        let snapshot = self.health.snapshot();
        let manifest = set.manifest();

        let mut missing = Vec::new();
        let mut reads = FuturesUnordered::new();
        for shard in &set.shards {
            if shard.status != ShardStatus::Present || snapshot.is_down(&shard.location) {
                missing.push(shard.index);
                continue;
            }
            let key = set.key(shard.index);
            let location = shard.location.clone();
            let index = shard.index;
            reads.push(async move {
                let result = self
                    .retry
                    .run("read shard", || self.shards.read_shard(&location, &key))
                    .await;
                (index, location, result)
            });
        }

        let mut fetched: Vec<Option<Bytes>> = vec![None; set.total_shards()];
        let mut valid = 0;
        let mut bad = Vec::new();
        let mut unreachable = Vec::new();
        while let Some((index, location, result)) = reads.next().await {
            match result {
                Ok(Some(bytes)) if manifest.is_valid(index, &bytes) => {
                    fetched[index] = Some(bytes);
                    valid += 1;
                    if valid >= set.data_shards {
                        break;
                    }
                }
                Ok(Some(_)) => {
                    warn!("Shard {} of {}/{} on {} is corrupt", index, pool, object, location);
                    bad.push(index);
                }
                Ok(None) => {
                    warn!("Shard {} of {}/{} is gone from {}", index, pool, object, location);
                    bad.push(index);
                }
                Err(e) => {
                    debug!("Shard {} of {}/{} unreadable: {}", index, pool, object, e);
                    if e.is_retryable() {
                        unreachable.push(location);
                    }
                    missing.push(index);
                }
            }
        }
        // reads still in flight are not needed any more
        drop(reads);

        for location in &unreachable {
            self.health.escalate(location, &self.pools.list()).await;
        }
        for index in &bad {
            if let Err(e) = self
                .catalog
                .mark_status(pool, &set.id, *index, ShardStatus::Missing)
                .await
            {
                warn!("Failed to mark {} missing: {}", set.key(*index), e);
            }
        }
        missing.extend(bad);
        missing.sort_unstable();

        let codec = ErasureCodec::new(set.data_shards, set.parity_shards)?;
        let name = object.to_string();
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&name, fetched, &manifest))
            .await
            .map_err(|e| Error::Internal(format!("decode task failed: {}", e)))?;

        let data = match decoded {
            Ok(data) => data,
            Err(Error::UnrecoverableLoss {
                object: lost,
                available,
                required,
            }) => {
                self.metrics.unrecoverable_reads.inc();
                error!(
                    "Object {}/{} is lost: {} valid shards, {} needed",
                    pool, object, available, required
                );
                self.publish(DomainEvent::ObjectLost {
                    pool: pool.to_string(),
                    object: object.to_string(),
                    available,
                    required,
                    timestamp: Utc::now(),
                })
                .await;
                return Err(Error::UnrecoverableLoss {
                    object: lost,
                    available,
                    required,
                });
            }
            Err(e) => return Err(e),
        };

        if !missing.is_empty() {
            self.metrics.degraded_reads.inc();
            info!(
                "Degraded read of {}/{}: shards {:?} unavailable",
                pool, object, missing
            );
            self.publish(DomainEvent::degraded_read(
                pool,
                object,
                missing,
                started.elapsed(),
            ))
            .await;
        }
        Ok(Bytes::from(data))
    }

    /// Forget an object and delete its shards. Copies on down participants
    /// are left behind.
    #[instrument(skip(self))]
    pub async fn delete_object(&self, pool: &str, object: &str) -> Result<ShardSet> {
        self.pools.get(pool)?;
        let set = self.catalog.remove(pool, object).await?;

        let released = self.delete_shards(&set).await;
        if let Err(e) = self.pools.adjust_free_space(pool, &[], &released).await {
            warn!("Failed to update free space of {}: {}", pool, e);
        }

        info!("Deleted {}/{} ({} shards removed)", pool, object, released.len());
        self.publish(DomainEvent::ObjectDeleted {
            pool: pool.to_string(),
            object: object.to_string(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(set)
    }

    /// Objects with their redundancy. Shards on down participants, or on
    /// participants removed from the pool, do not count as available.
    pub fn list_objects(&self, pool: &str) -> Result<Vec<ObjectSummary>> {
        let config = self.pools.get(pool)?;
        let snapshot = self.health.snapshot();
        Ok(self
            .catalog
            .list(pool)
            .into_iter()
            .map(|set| ObjectSummary {
                shard_health: set.health(|p| snapshot.is_down(p) || !config.contains(p)),
                name: set.object,
                size: set.object_size,
                shard_set: set.id,
                updated_at: set.updated_at,
            })
            .collect())
    }

    // =========================================================================
    // Rebalance
    // =========================================================================

    /// Dry-run: the moves that would restore full fault tolerance.
    pub fn plan_rebalance(&self, pool: &str) -> Result<RebalancePlan> {
        self.rebalance.plan(pool)
    }

    /// Plan and execute in one go.
    pub async fn execute_rebalance(
        &self,
        pool: &str,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport> {
        let plan = self.rebalance.plan(pool)?;
        self.rebalance.execute(plan, cancel).await
    }

    /// Execute a plan obtained earlier from [`plan_rebalance`](Self::plan_rebalance).
    pub async fn execute_plan(
        &self,
        plan: RebalancePlan,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport> {
        self.rebalance.execute(plan, cancel).await
    }

    // =========================================================================
    // Background
    // =========================================================================

    /// Start the probe loop, the rebalance loop, and a listener that
    /// re-plans pools when one of their participants goes down.
    pub fn spawn_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let probing = tokio::spawn(self.health.clone().run(
            self.probe.clone(),
            self.pools.clone(),
            shutdown.clone(),
        ));
        let rebalancing = tokio::spawn(self.rebalance.clone().run(shutdown.clone()));

        let mut transitions = self.health.subscribe();
        let pools = self.pools.clone();
        let rebalance = self.rebalance.clone();
        let replanning = tokio::spawn(async move {
            loop {
                let transition = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = transitions.recv() => received,
                };
                match transition {
                    Ok(t) if t.to == ParticipantState::Down => {
                        for pool in pools.list().iter().filter(|p| p.contains(&t.participant)) {
                            let outcome = rebalance.topology_changed(pool).await;
                            debug!(
                                "Re-planned {} after {} went down: {:?}",
                                pool.name, t.participant, outcome
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "Missed {} participant transitions; the next reconcile catches up",
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        vec![probing, rebalancing, replanning]
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Best-effort removal of shards written by a failed put.
    async fn roll_back(&self, object: &str, written: &[(ParticipantId, ShardKey)]) {
        self.metrics.write_rollbacks.inc();
        warn!("Rolling back {} shards of {}", written.len(), object);
        join_all(written.iter().map(|(location, key)| async move {
            if let Err(e) = self.shards.delete_shard(location, key).await {
                warn!("Rollback left {} on {}: {}", key, location, e);
            }
        }))
        .await;
    }

    /// Delete every reachable shard of a set; returns the space released.
    async fn delete_shards(&self, set: &ShardSet) -> Vec<(ParticipantId, u64)> {
        let snapshot = self.health.snapshot();
        let deletions = set.shards.iter().map(|shard| {
            let key = set.key(shard.index);
            let location = shard.location.clone();
            let skip = snapshot.is_down(&location);
            async move {
                if skip {
                    warn!("Leaving {} on down participant {}", key, location);
                    return None;
                }
                match self
                    .retry
                    .run("delete shard", || self.shards.delete_shard(&location, &key))
                    .await
                {
                    Ok(true) => Some((location, set.shard_len)),
                    Ok(false) => None,
                    Err(e) => {
                        warn!("Failed to delete {} on {}: {}", key, location, e);
                        None
                    }
                }
            }
        });
        join_all(deletions).await.into_iter().flatten().collect()
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("object name must not be empty".into()));
    }
    if name.len() > MAX_OBJECT_NAME_LEN {
        return Err(Error::Validation(format!(
            "object name is {} bytes, limit is {}",
            name.len(),
            MAX_OBJECT_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(Error::Validation("object name must not contain NUL".into()));
    }
    Ok(())
}
