//! Rebalance Engine
//!
//! Plans and executes shard moves that bring a pool back to full fault
//! tolerance.
//!
//! # Safety Guarantees
//!
//! 1. A source copy is never deleted before its replacement was written,
//!    read back and checksum-verified
//! 2. The catalog points at the new location before the old copy goes away
//! 3. A failed move leaves the source and the catalog untouched
//! 4. Cancellation is checked between moves; committed moves stay committed

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::plan::{ExecutionReport, MoveResult, PlanOutcome, RebalancePlan, ShardMove};
use crate::catalog::{FileCatalog, ShardSet, ShardStatus};
use crate::config::{RebalanceConfig, MAX_CONCURRENT_MOVES};
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, ShardKey, ShardStore, TopologyObserver};
use crate::ec::{ErasureCodec, ShardManifest};
use crate::error::{Error, Result};
use crate::health::{HealthMonitor, PoolHealth};
use crate::metrics::EngineMetrics;
use crate::placement::PlacementPlanner;
use crate::pool::types::{DiskStatus, Participant, ParticipantId, PoolConfig};
use crate::pool::ConfigStore;
use crate::retry::RetryPolicy;

/// Per-run state shared by concurrently executing moves.
struct RunContext {
    pool: String,
    cancel: CancellationToken,
    abort_reason: Mutex<Option<String>>,
}

impl RunContext {
    fn abort(&self, reason: impl Into<String>) {
        let mut slot = self.abort_reason.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    /// Whether new moves must not start.
    fn halted(&self) -> bool {
        if self.cancel.is_cancelled() {
            self.abort("cancelled");
        }
        self.abort_reason.lock().is_some()
    }
}

/// Removes the pool from the active set when a run ends.
struct ActiveRun<'a> {
    active: &'a DashMap<String, ()>,
    pool: String,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.pool);
    }
}

/// Releases a destination reservation when a move ends.
struct Reservation<'a> {
    table: &'a DashMap<ParticipantId, u64>,
    participant: ParticipantId,
    bytes: u64,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(mut r) = self.table.get_mut(&self.participant) {
            *r = r.saturating_sub(self.bytes);
        }
    }
}

pub struct RebalanceEngine {
    config: RebalanceConfig,
    retry: RetryPolicy,
    planner: PlacementPlanner,
    pools: Arc<ConfigStore>,
    catalog: Arc<FileCatalog>,
    shards: Arc<dyn ShardStore>,
    health: Arc<HealthMonitor>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<EngineMetrics>,
    /// Bytes promised to in-flight moves per destination
    reservations: DashMap<ParticipantId, u64>,
    active: DashMap<String, ()>,
    queue: mpsc::UnboundedSender<RebalancePlan>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<RebalancePlan>>>,
}

impl RebalanceEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RebalanceConfig,
        retry: RetryPolicy,
        planner: PlacementPlanner,
        pools: Arc<ConfigStore>,
        catalog: Arc<FileCatalog>,
        shards: Arc<dyn ShardStore>,
        health: Arc<HealthMonitor>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<EngineMetrics>,
    ) -> Arc<Self> {
        let (queue, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config,
            retry,
            planner,
            pools,
            catalog,
            shards,
            health,
            events,
            metrics,
            reservations: DashMap::new(),
            active: DashMap::new(),
            queue,
            queue_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn is_running(&self, pool: &str) -> bool {
        self.active.contains_key(pool)
    }

    /// Compute the moves that would restore full fault tolerance. Nothing
    /// is touched.
    #[instrument(skip(self))]
    pub fn plan(&self, pool: &str) -> Result<RebalancePlan> {
        let config = self.pools.get(pool)?;
        self.plan_for(&config)
    }

    fn plan_for(&self, pool: &PoolConfig) -> Result<RebalancePlan> {
        let sets = self.catalog.list(&pool.name);
        let plan = self
            .planner
            .reassign(pool, &sets, &self.health.snapshot())?;

        for mv in &plan.moves {
            info!("[DRY-RUN] Would move {} ({} bytes)", mv, mv.bytes);
        }
        info!(
            "[DRY-RUN] Pool {}: {} moves, ~{} bytes over {} shard sets",
            pool.name,
            plan.len(),
            plan.estimated_bytes_moved,
            sets.len()
        );
        Ok(plan)
    }

    /// Queue a plan for the background loop.
    pub fn submit(&self, plan: RebalancePlan) -> Result<()> {
        self.queue
            .send(plan)
            .map_err(|_| Error::Internal("rebalance queue closed".into()))
    }

    /// Execute a plan move by move (or up to `max_concurrent_moves` at a
    /// time). Returns the report, including for aborted runs.
    #[instrument(skip(self, plan, cancel), fields(pool = %plan.pool, moves = plan.len()))]
    pub async fn execute(
        &self,
        plan: RebalancePlan,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport> {
        let plan = plan.for_execution();
        if self.active.insert(plan.pool.clone(), ()).is_some() {
            return Err(Error::RebalanceAborted {
                pool: plan.pool.clone(),
                reason: "another rebalance of this pool is running".into(),
            });
        }
        let _active = ActiveRun {
            active: &self.active,
            pool: plan.pool.clone(),
        };

        let current = self.pools.get(&plan.pool)?;
        if current.generation != plan.pool_generation {
            debug!(
                "Plan for {} was computed at generation {}, pool is at {}",
                plan.pool, plan.pool_generation, current.generation
            );
        }

        info!(
            "Starting rebalance of {}: {} moves, ~{} bytes",
            plan.pool,
            plan.len(),
            plan.estimated_bytes_moved
        );

        let ctx = RunContext {
            pool: plan.pool.clone(),
            cancel,
            abort_reason: Mutex::new(None),
        };
        let mut report = ExecutionReport::new(&plan.pool);
        let concurrency = self.config.max_concurrent_moves.clamp(1, MAX_CONCURRENT_MOVES);

        let mut results = stream::iter(plan.moves)
            .map(|mv| {
                let ctx = &ctx;
                async move {
                    let result = self.execute_move(ctx, &mv).await;
                    (mv, result)
                }
            })
            .buffer_unordered(concurrency);

        while let Some((mv, result)) = results.next().await {
            let label = match &result {
                MoveResult::Committed { .. } => "committed",
                MoveResult::Failed { reason } => {
                    warn!("Move {} failed, source kept: {}", mv, reason);
                    "failed"
                }
                MoveResult::Skipped { reason } => {
                    debug!("Move {} skipped: {}", mv, reason);
                    "skipped"
                }
                MoveResult::Dropped => "dropped",
            };
            self.metrics.record_move(label);
            report.record(mv, result);
        }
        drop(results);

        if let Some(reason) = ctx.abort_reason.lock().take() {
            report.abort(reason);
        }
        report.finish();
        self.metrics.rebalance_bytes_moved.inc_by(report.bytes_moved);

        match &report.abort_reason {
            Some(reason) => warn!(
                "Rebalance of {} aborted ({}): {} committed, {} dropped",
                report.pool,
                reason,
                report.committed(),
                report.dropped()
            ),
            None => info!(
                "Rebalance of {} {}: {} committed, {} failed, {} skipped, {} bytes",
                report.pool,
                report.state,
                report.committed(),
                report.failed(),
                report.skipped(),
                report.bytes_moved
            ),
        }

        self.publish(DomainEvent::RebalanceFinished {
            pool: report.pool.clone(),
            state: report.state.to_string(),
            committed: report.committed(),
            failed: report.failed(),
            dropped: report.dropped(),
            bytes_moved: report.bytes_moved,
            duration_ms: report.duration().num_milliseconds().max(0) as u64,
            timestamp: Utc::now(),
        })
        .await;

        Ok(report)
    }

    async fn execute_move(&self, ctx: &RunContext, mv: &ShardMove) -> MoveResult {
        if ctx.halted() {
            return MoveResult::Dropped;
        }

        let pool = match self.pools.get(&ctx.pool) {
            Ok(pool) => pool,
            Err(_) => {
                ctx.abort("pool was deleted");
                return MoveResult::Dropped;
            }
        };
        if self.health.pool_health(&pool).health == PoolHealth::Unavailable {
            ctx.abort("pool became unavailable");
            return MoveResult::Dropped;
        }

        let Some(set) = self.catalog.get_set(&pool.name, &mv.shard_set) else {
            return MoveResult::Skipped {
                reason: "object was deleted".into(),
            };
        };
        match set.shard(mv.index) {
            Some(shard) if shard.location == mv.source => {}
            _ => {
                return MoveResult::Skipped {
                    reason: "shard changed since planning".into(),
                }
            }
        }

        // writes take priority: recheck room right before moving
        let (destination, reservation) = match self.reserve(&pool, &set, mv).await {
            Some(found) => found,
            None => {
                ctx.abort(format!(
                    "capacity regression: no participant has {} free bytes for {}",
                    mv.bytes, mv
                ));
                return MoveResult::Dropped;
            }
        };
        let replanned = destination != mv.destination;
        if replanned {
            info!("Re-planned {} to {}", mv, destination);
        }

        let result = self
            .relocate(&pool, &set, mv, &destination, replanned)
            .await;
        drop(reservation);

        match result {
            Ok(committed) => committed,
            Err(e) => MoveResult::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// Reserve space on the planned destination, or on the best alternate
    /// when the planned one no longer has room.
    async fn reserve(
        &self,
        pool: &PoolConfig,
        set: &ShardSet,
        mv: &ShardMove,
    ) -> Option<(ParticipantId, Reservation<'_>)> {
        let snapshot = self.health.snapshot();
        let live: Vec<&Participant> = pool
            .participants
            .iter()
            .filter(|p| p.status != DiskStatus::Offline && snapshot.is_up(&p.id()))
            .collect();

        let mut excluded: HashSet<ParticipantId> = set
            .shards
            .iter()
            .filter(|s| s.index != mv.index)
            .map(|s| s.location.clone())
            .collect();
        let reserved: HashMap<ParticipantId, u64> = self
            .reservations
            .iter()
            .map(|r| (r.key().clone(), *r.value()))
            .collect();

        let mut candidate = Some(mv.destination.clone()).filter(|d| pool.contains(d));
        while let Some(dest) = candidate.take() {
            if let Some(r) = self.try_reserve(&dest, mv.bytes).await {
                return Some((dest, r));
            }
            excluded.insert(dest);
            candidate = self.planner.pick_destination(
                pool.strategy,
                &live,
                &excluded,
                mv.bytes,
                &reserved,
                &HashMap::new(),
            );
        }
        None
    }

    async fn try_reserve(&self, dest: &ParticipantId, bytes: u64) -> Option<Reservation<'_>> {
        let free = match self.shards.free_bytes(dest).await {
            Ok(free) => free,
            Err(e) => {
                debug!("Cannot read free space of {}: {}", dest, e);
                return None;
            }
        };
        let mut held = self.reservations.entry(dest.clone()).or_insert(0);
        if free.saturating_sub(*held) < bytes {
            return None;
        }
        *held += bytes;
        Some(Reservation {
            table: &self.reservations,
            participant: dest.clone(),
            bytes,
        })
    }

    /// Copy (or rebuild), verify, commit, then retire the source.
    async fn relocate(
        &self,
        pool: &PoolConfig,
        set: &ShardSet,
        mv: &ShardMove,
        destination: &ParticipantId,
        replanned: bool,
    ) -> Result<MoveResult> {
        let key = set.key(mv.index);
        let manifest = set.manifest();
        let in_place = destination == &mv.source;
        let source_down = self.health.snapshot().is_down(&mv.source);

        let copied = if mv.reconstruct || source_down {
            None
        } else {
            self.read_valid(&mv.source, &key, &manifest, mv.index, true).await
        };
        let reconstructed = copied.is_none();
        let bytes = match copied {
            Some(bytes) => bytes,
            None => self.rebuild(set, mv.index).await?,
        };

        if let Err(e) = self
            .retry
            .run("write shard", || {
                self.shards.write_shard(destination, &key, bytes.clone())
            })
            .await
        {
            if e.is_retryable() {
                self.health.escalate(destination, &self.pools.list()).await;
            }
            if !in_place {
                self.discard(destination, &key).await;
            }
            return Err(e);
        }

        if self
            .read_valid(destination, &key, &manifest, mv.index, true)
            .await
            .is_none()
        {
            if !in_place {
                self.discard(destination, &key).await;
            }
            return Err(Error::Internal(format!(
                "copy of {} on {} failed verification",
                key, destination
            )));
        }

        if let Err(e) = self
            .catalog
            .relocate_shard(&pool.name, &set.id, mv.index, &mv.source, destination)
            .await
        {
            if !in_place {
                self.discard(destination, &key).await;
            }
            return Err(e);
        }

        let mut released = Vec::new();
        let orphaned_source = if in_place {
            false
        } else if source_down {
            warn!("Left old copy of {} on down participant {}", key, mv.source);
            true
        } else {
            match self
                .retry
                .run("delete shard", || self.shards.delete_shard(&mv.source, &key))
                .await
            {
                Ok(_) => {
                    released.push((mv.source.clone(), mv.bytes));
                    false
                }
                Err(e) => {
                    warn!("Old copy of {} left on {}: {}", key, mv.source, e);
                    true
                }
            }
        };

        let consumed = if in_place {
            Vec::new()
        } else {
            vec![(destination.clone(), mv.bytes)]
        };
        if let Err(e) = self
            .pools
            .adjust_free_space(&pool.name, &consumed, &released)
            .await
        {
            warn!("Failed to update free space of {}: {}", pool.name, e);
        }

        debug!("Moved {} to {}", mv, destination);
        self.publish(DomainEvent::ShardMoved {
            pool: pool.name.clone(),
            shard_set: set.id.to_string(),
            index: mv.index,
            from: mv.source.to_string(),
            to: destination.to_string(),
            reconstructed,
            timestamp: Utc::now(),
        })
        .await;

        Ok(MoveResult::Committed {
            destination: destination.clone(),
            reconstructed,
            replanned,
            orphaned_source,
        })
    }

    /// Read one copy and keep it only if length and checksum match.
    async fn read_valid(
        &self,
        location: &ParticipantId,
        key: &ShardKey,
        manifest: &ShardManifest,
        index: usize,
        retry: bool,
    ) -> Option<Bytes> {
        let read = if retry {
            self.retry
                .run("read shard", || self.shards.read_shard(location, key))
                .await
        } else {
            self.shards.read_shard(location, key).await
        };
        match read {
            Ok(Some(bytes)) if manifest.is_valid(index, &bytes) => Some(bytes),
            Ok(Some(_)) => {
                warn!("Copy of {} on {} is corrupt", key, location);
                None
            }
            Ok(None) => None,
            Err(e) => {
                debug!("Read of {} on {} failed: {}", key, location, e);
                None
            }
        }
    }

    /// Rebuild shard `index` of a set from its peers.
    async fn rebuild(&self, set: &ShardSet, index: usize) -> Result<Bytes> {
        if let Err(e) = self
            .catalog
            .mark_status(&set.pool, &set.id, index, ShardStatus::Reconstructing)
            .await
        {
            warn!("Failed to mark {} reconstructing: {}", set.key(index), e);
        }

        let snapshot = self.health.snapshot();
        let manifest = set.manifest();
        let peers = join_all(set.shards.iter().map(|shard| {
            let key = set.key(shard.index);
            let manifest = &manifest;
            let skip = shard.index == index
                || shard.status != ShardStatus::Present
                || snapshot.is_down(&shard.location);
            async move {
                if skip {
                    None
                } else {
                    self.read_valid(&shard.location, &key, manifest, shard.index, false)
                        .await
                }
            }
        }))
        .await;

        let codec = ErasureCodec::new(set.data_shards, set.parity_shards)?;
        let object = set.object.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            codec.reconstruct_shard(&object, peers, &manifest, index)
        })
        .await
        .map_err(|e| Error::Internal(format!("reconstruction task failed: {}", e)))?;

        match bytes {
            Ok(bytes) => {
                info!("Reconstructed {} from peers", set.key(index));
                Ok(bytes)
            }
            Err(e) => {
                error!("Cannot reconstruct {}: {}", set.key(index), e);
                Err(e)
            }
        }
    }

    async fn discard(&self, location: &ParticipantId, key: &ShardKey) {
        if let Err(e) = self.shards.delete_shard(location, key).await {
            debug!("Cleanup of {} on {} failed: {}", key, location, e);
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish rebalance event: {}", e);
        }
    }

    /// Plan and, if configured, execute every pool that is out of shape.
    pub async fn reconcile_all(&self, cancel: &CancellationToken) -> Vec<ExecutionReport> {
        let mut reports = Vec::new();
        for pool in self.pools.list() {
            if cancel.is_cancelled() {
                break;
            }
            let plan = match self.plan_for(&pool) {
                Ok(plan) if plan.is_empty() => continue,
                Ok(plan) => plan,
                Err(Error::PlacementInfeasible { live, required, .. }) => {
                    debug!(
                        "Pool {} cannot be repaired yet ({} live, {} needed)",
                        pool.name, live, required
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Planning {} failed: {}", pool.name, e);
                    continue;
                }
            };
            if !self.config.auto_execute {
                info!(
                    "Pool {} needs {} moves; auto-execute is off",
                    pool.name,
                    plan.len()
                );
                continue;
            }
            match self.execute(plan, cancel.child_token()).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Rebalance of {} not run: {}", pool.name, e),
            }
        }
        reports
    }

    /// Background loop: executes submitted plans and reconciles every pool
    /// on `reconcile_interval` until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let Some(mut rx) = self.queue_rx.lock().take() else {
            warn!("Rebalance loop already running");
            return;
        };
        info!(
            "Rebalance loop started (reconcile every {:?}, {} concurrent moves)",
            self.config.reconcile_interval, self.config.max_concurrent_moves
        );

        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick fires at once; skip it so startup probes land first
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Rebalance loop shutting down");
                    break;
                }
                Some(plan) = rx.recv() => {
                    let pool = plan.pool.clone();
                    if let Err(e) = self.execute(plan, shutdown.child_token()).await {
                        warn!("Queued rebalance of {} not run: {}", pool, e);
                    }
                }
                _ = ticker.tick() => {
                    self.reconcile_all(&shutdown).await;
                }
            }
        }
    }
}

#[async_trait]
impl TopologyObserver for RebalanceEngine {
    async fn topology_changed(&self, pool: &PoolConfig) -> PlanOutcome {
        let plan = match self.plan_for(pool) {
            Ok(plan) => plan,
            Err(Error::PlacementInfeasible { live, required, .. }) => {
                warn!(
                    "Pool {} has {} live participants, {} needed; serving degraded",
                    pool.name, live, required
                );
                return PlanOutcome::Infeasible { live, required };
            }
            Err(e) => {
                return PlanOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let outcome = PlanOutcome::from_plan(&plan);
        if !plan.is_empty() && self.config.auto_execute {
            if let Err(e) = self.submit(plan) {
                return PlanOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryEventCollector, InMemoryMetadataStore, InMemoryShardStore};
    use crate::config::HealthConfig;
    use crate::health::ParticipantState;
    use crate::pool::types::PoolSpec;
    use crate::rebalance::ExecutionState;
    use std::time::Duration;

    struct Fixture {
        engine: Arc<RebalanceEngine>,
        pools: Arc<ConfigStore>,
        catalog: Arc<FileCatalog>,
        disks: Arc<InMemoryShardStore>,
        health: Arc<HealthMonitor>,
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    async fn fixture(n: usize, k: usize, m: usize) -> Fixture {
        let meta = Arc::new(InMemoryMetadataStore::new());
        let catalog = Arc::new(FileCatalog::new(meta.clone()));
        let events = Arc::new(InMemoryEventCollector::new());
        let metrics = Arc::new(EngineMetrics::new().unwrap());
        let pools = Arc::new(ConfigStore::new(meta, catalog.clone(), events.clone()));
        let disks = Arc::new(InMemoryShardStore::new());
        let health = Arc::new(HealthMonitor::new(
            HealthConfig::default(),
            events.clone(),
            metrics.clone(),
        ));

        let participants: Vec<Participant> = (0..n)
            .map(|i| Participant::new(format!("node{}", i), "/data", 10_000, 10_000))
            .collect();
        disks.register(&participants);
        let pool = pools
            .create(PoolSpec::new("p", k, m, participants))
            .await
            .unwrap();
        health.track(&pool);
        health
            .probe_all(disks.as_ref(), std::slice::from_ref(&pool))
            .await;

        let config = RebalanceConfig {
            auto_execute: false,
            ..RebalanceConfig::default()
        };
        let engine = RebalanceEngine::new(
            config,
            fast_retry(),
            PlacementPlanner::default(),
            pools.clone(),
            catalog.clone(),
            disks.clone(),
            health.clone(),
            events,
            metrics,
        );
        Fixture {
            engine,
            pools,
            catalog,
            disks,
            health,
        }
    }

    /// Store one object on the first k+m participants.
    async fn store_object(f: &Fixture, name: &str, data: &[u8]) -> ShardSet {
        let pool = f.pools.get("p").unwrap();
        let codec = ErasureCodec::new(pool.data_shards, pool.parity_shards).unwrap();
        let encoded = codec.encode(data).unwrap();
        let targets: Vec<_> = pool.participant_ids()[..pool.total_shards()].to_vec();
        let set = ShardSet::from_encoded(
            "p",
            name,
            &encoded,
            &targets,
            pool.data_shards,
            pool.parity_shards,
        )
        .unwrap();
        for (shard, target) in encoded.shards.iter().zip(&targets) {
            f.disks
                .write_shard(target, &set.key(shard.index), shard.bytes.clone())
                .await
                .unwrap();
        }
        f.catalog.commit(set.clone()).await.unwrap();
        set
    }

    #[tokio::test]
    async fn test_compliant_pool_plans_nothing() {
        let f = fixture(4, 2, 1).await;
        store_object(&f, "a", b"hello world").await;
        let plan = f.engine.plan("p").unwrap();
        assert!(plan.is_empty());
        assert!(plan.dry_run);
    }

    #[tokio::test]
    async fn test_move_off_removed_participant() {
        let f = fixture(4, 2, 1).await;
        let set = store_object(&f, "a", b"some object bytes").await;
        let leaving = set.shards[0].location.clone();

        f.pools.remove_participant("p", &leaving).await.unwrap();
        let plan = f.engine.plan("p").unwrap();
        assert_eq!(plan.len(), 1);

        let report = f
            .engine
            .execute(plan, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.state, ExecutionState::Completed);
        assert_eq!(report.committed(), 1);

        let moved = f.catalog.get("p", "a").unwrap();
        let new_home = ParticipantId::new("node3", "/data");
        assert_eq!(moved.shards[0].location, new_home);
        assert!(f.disks.has_shard(&new_home, &moved.key(0)));
        assert!(!f.disks.has_shard(&leaving, &moved.key(0)));
        assert!(f.engine.plan("p").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_down_source_is_reconstructed() {
        let f = fixture(4, 2, 1).await;
        let set = store_object(&f, "a", &[9u8; 300]).await;
        let pool = f.pools.get("p").unwrap();
        let victim = set.shards[1].location.clone();
        f.disks.set_offline(&victim, true);
        f.health
            .escalate(&victim, std::slice::from_ref(&pool))
            .await;

        let plan = f.engine.plan("p").unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan.moves[0].reconstruct);

        let report = f
            .engine
            .execute(plan, CancellationToken::new())
            .await
            .unwrap();
        assert_matches::assert_matches!(
            &report.outcomes[0].result,
            MoveResult::Committed {
                reconstructed: true,
                orphaned_source: true,
                ..
            }
        );
        let repaired = f.catalog.get("p", "a").unwrap();
        assert_eq!(repaired.shards[1].status, ShardStatus::Present);
        assert!(!repaired.uses(&victim));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_source() {
        let f = fixture(4, 2, 1).await;
        let set = store_object(&f, "a", b"keep me").await;
        let leaving = set.shards[2].location.clone();
        f.pools.remove_participant("p", &leaving).await.unwrap();

        let target = ParticipantId::new("node3", "/data");
        f.disks.fail_next_writes(&target, 10);

        let plan = f.engine.plan("p").unwrap();
        let report = f
            .engine
            .execute(plan, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.state, ExecutionState::PartiallyCompleted);
        assert_eq!(report.failed(), 1);

        let unchanged = f.catalog.get("p", "a").unwrap();
        assert_eq!(unchanged.shards[2].location, leaving);
        assert!(f.disks.has_shard(&leaving, &unchanged.key(2)));
        assert_eq!(
            f.health.participant_state(&target),
            Some(ParticipantState::Down)
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_drops_remaining_moves() {
        let f = fixture(4, 2, 1).await;
        let set = store_object(&f, "a", b"one").await;
        store_object(&f, "b", b"two").await;
        f.pools
            .remove_participant("p", &set.shards[0].location)
            .await
            .unwrap();

        let plan = f.engine.plan("p").unwrap();
        assert_eq!(plan.len(), 2);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = f.engine.execute(plan, cancel).await.unwrap();
        assert_eq!(report.state, ExecutionState::Aborted);
        assert_eq!(report.dropped(), 2);
        assert_eq!(
            f.catalog.get("p", "a").unwrap().shards[0].location,
            set.shards[0].location
        );
        assert!(report.into_result().is_err());
    }

    #[tokio::test]
    async fn test_shrunken_destination_is_replanned() {
        let f = fixture(5, 2, 1).await;
        let set = store_object(&f, "a", &[1u8; 100]).await;
        f.pools
            .remove_participant("p", &set.shards[0].location)
            .await
            .unwrap();

        let plan = f.engine.plan("p").unwrap();
        let planned = plan.moves[0].destination.clone();
        f.disks.set_capacity(&planned, 0);

        let report = f
            .engine
            .execute(plan, CancellationToken::new())
            .await
            .unwrap();
        assert_matches::assert_matches!(
            &report.outcomes[0].result,
            MoveResult::Committed { replanned: true, destination, .. } if destination != &planned
        );
    }

    #[tokio::test]
    async fn test_no_room_anywhere_aborts() {
        let f = fixture(4, 2, 1).await;
        let set = store_object(&f, "a", &[1u8; 100]).await;
        f.pools
            .remove_participant("p", &set.shards[0].location)
            .await
            .unwrap();
        f.disks
            .set_capacity(&ParticipantId::new("node3", "/data"), 0);

        let plan = f.engine.plan("p").unwrap();
        let report = f
            .engine
            .execute(plan, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.state, ExecutionState::Aborted);
        assert!(report
            .abort_reason
            .as_deref()
            .is_some_and(|r| r.contains("capacity")));
    }

    #[tokio::test]
    async fn test_topology_change_reports_infeasible() {
        let f = fixture(6, 4, 2).await;
        let observer: Arc<dyn TopologyObserver> = f.engine.clone();
        f.pools.set_observer(Arc::downgrade(&observer));

        let change = f
            .pools
            .remove_participant("p", &ParticipantId::new("node5", "/data"))
            .await
            .unwrap();
        assert_eq!(
            change.outcome,
            Some(PlanOutcome::Infeasible {
                live: 5,
                required: 6
            })
        );
    }
}
