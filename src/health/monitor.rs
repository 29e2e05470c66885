//! Health monitor: debounces raw probe results into participant states and
//! re-derives pool health on every participant transition.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{HealthSnapshot, ParticipantState, PoolHealth};
use crate::config::HealthConfig;
use crate::domain::events::DomainEvent;
use crate::domain::ports::{EventPublisher, ReachabilityProbe};
use crate::metrics::EngineMetrics;
use crate::pool::types::{ParticipantId, PoolConfig};
use crate::pool::ConfigStore;

/// A participant state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub participant: ParticipantId,
    pub from: ParticipantState,
    pub to: ParticipantState,
}

/// Pool health together with the participants behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolHealthReport {
    pub health: PoolHealth,
    pub up: Vec<ParticipantId>,
    pub suspect: Vec<ParticipantId>,
    pub down: Vec<ParticipantId>,
}

#[derive(Debug, Clone)]
struct Tracker {
    state: ParticipantState,
    failures: u32,
    successes: u32,
    changed_at: DateTime<Utc>,
}

impl Tracker {
    /// Fresh trackers stay Suspect until the first probe answers.
    fn pending() -> Self {
        Self {
            state: ParticipantState::Suspect,
            failures: 0,
            successes: 0,
            changed_at: Utc::now(),
        }
    }

    fn apply(&mut self, reachable: bool, config: &HealthConfig) -> Option<ParticipantState> {
        let previous = self.state;
        if reachable {
            self.failures = 0;
            self.successes += 1;
            self.state = match self.state {
                ParticipantState::Down if self.successes < config.recover_after => {
                    ParticipantState::Down
                }
                _ => ParticipantState::Up,
            };
        } else {
            self.successes = 0;
            self.failures += 1;
            if self.failures >= config.down_after {
                self.state = ParticipantState::Down;
            } else if self.failures >= config.suspect_after && self.state == ParticipantState::Up
            {
                self.state = ParticipantState::Suspect;
            }
        }

        if self.state != previous {
            self.changed_at = Utc::now();
            if self.state == ParticipantState::Up {
                self.successes = 0;
            }
            Some(previous)
        } else {
            None
        }
    }
}

/// Aggregates reachability probes into participant and pool health.
///
/// State is in-memory only; after a restart every participant starts as
/// `Suspect` and is re-probed before it can be declared `Down`.
pub struct HealthMonitor {
    config: HealthConfig,
    participants: DashMap<ParticipantId, Tracker>,
    pools: DashMap<String, PoolHealth>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<EngineMetrics>,
    transitions: broadcast::Sender<Transition>,
}

/// Buffered transitions per subscriber before the slowest one lags.
const TRANSITION_BUFFER: usize = 256;

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            config,
            participants: DashMap::new(),
            pools: DashMap::new(),
            events,
            metrics,
            transitions: broadcast::channel(TRANSITION_BUFFER).0,
        }
    }

    /// Stream of participant transitions, e.g. for a rebalance trigger.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    /// Start tracking the participants of a pool.
    pub fn track(&self, pool: &PoolConfig) {
        for p in &pool.participants {
            self.participants.entry(p.id()).or_insert_with(Tracker::pending);
        }
    }

    /// Stop reporting on a deleted pool and drop its participants, which
    /// belong to no other pool.
    pub fn forget_pool(&self, pool: &PoolConfig) {
        self.pools.remove(&pool.name);
        self.metrics.forget_pool(&pool.name);
        for p in &pool.participants {
            self.participants.remove(&p.id());
        }
    }

    pub fn participant_state(&self, participant: &ParticipantId) -> Option<ParticipantState> {
        self.participants.get(participant).map(|t| t.state)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot::from_states(
            self.participants
                .iter()
                .map(|e| (e.key().clone(), e.value().state)),
        )
    }

    pub fn pool_health(&self, pool: &PoolConfig) -> PoolHealthReport {
        let mut report = PoolHealthReport {
            health: PoolHealth::Healthy,
            up: Vec::new(),
            suspect: Vec::new(),
            down: Vec::new(),
        };
        for p in &pool.participants {
            let id = p.id();
            match self.participant_state(&id).unwrap_or(ParticipantState::Suspect) {
                ParticipantState::Up => report.up.push(id),
                ParticipantState::Suspect => report.suspect.push(id),
                ParticipantState::Down => report.down.push(id),
            }
        }
        report.health = PoolHealth::classify(report.down.len(), pool.parity_shards);
        report
    }

    /// Feed one raw probe result; pools containing the participant are
    /// re-evaluated at once.
    pub async fn observe(
        &self,
        participant: &ParticipantId,
        reachable: bool,
        pools: &[PoolConfig],
    ) -> Option<Transition> {
        if !reachable {
            self.metrics.probe_failures.inc();
        }

        let transition = {
            let mut tracker = self
                .participants
                .entry(participant.clone())
                .or_insert_with(Tracker::pending);
            tracker
                .apply(reachable, &self.config)
                .map(|from| Transition {
                    participant: participant.clone(),
                    from,
                    to: tracker.state,
                })
        };

        if let Some(t) = &transition {
            self.announce(t, pools).await;
        }
        transition
    }

    /// Mark a participant Down right away, e.g. after I/O retries ran out.
    pub async fn escalate(
        &self,
        participant: &ParticipantId,
        pools: &[PoolConfig],
    ) -> Option<Transition> {
        let transition = {
            let mut tracker = self
                .participants
                .entry(participant.clone())
                .or_insert_with(Tracker::pending);
            let from = tracker.state;
            tracker.failures = self.config.down_after;
            tracker.successes = 0;
            if from == ParticipantState::Down {
                None
            } else {
                tracker.state = ParticipantState::Down;
                tracker.changed_at = Utc::now();
                Some(Transition {
                    participant: participant.clone(),
                    from,
                    to: ParticipantState::Down,
                })
            }
        };

        if let Some(t) = &transition {
            warn!("Escalating {} to down after repeated I/O failures", participant);
            self.announce(t, pools).await;
        }
        transition
    }

    /// Recompute a pool's health and publish a change if there was one.
    pub async fn evaluate(&self, pool: &PoolConfig) -> Option<(PoolHealth, PoolHealth)> {
        let report = self.pool_health(pool);
        let now = report.health;
        self.metrics.set_pool_health(&pool.name, now);

        let before = self.pools.insert(pool.name.clone(), now);
        let changed = match before {
            Some(prev) if prev != now => Some((prev, now)),
            None if now != PoolHealth::Healthy => Some((PoolHealth::Healthy, now)),
            _ => None,
        };

        if let Some((from, to)) = changed {
            match to {
                PoolHealth::Unavailable => error!(
                    "Pool {} is UNAVAILABLE: {} of {} participants down, tolerates {}",
                    pool.name,
                    report.down.len(),
                    pool.participants.len(),
                    pool.parity_shards
                ),
                PoolHealth::Degraded => warn!(
                    "Pool {} degraded: {} participants down",
                    pool.name,
                    report.down.len()
                ),
                PoolHealth::Healthy => info!("Pool {} healthy again", pool.name),
            }
            self.publish(DomainEvent::pool_health_changed(
                &pool.name,
                from,
                to,
                report.down.len(),
            ))
            .await;
        }
        changed
    }

    /// Probe every participant of the given pools concurrently.
    pub async fn probe_all(
        &self,
        probe: &dyn ReachabilityProbe,
        pools: &[PoolConfig],
    ) -> Vec<Transition> {
        let mut seen = HashSet::new();
        let targets: Vec<ParticipantId> = pools
            .iter()
            .flat_map(|p| p.participant_ids())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let results = join_all(targets.iter().map(|id| probe.probe(id))).await;

        let mut transitions = Vec::new();
        for (id, reachable) in targets.iter().zip(results) {
            if let Some(t) = self.observe(id, reachable, pools).await {
                transitions.push(t);
            }
        }
        for pool in pools {
            self.evaluate(pool).await;
        }
        debug!(
            "Probed {} participants, {} transitions",
            targets.len(),
            transitions.len()
        );
        transitions
    }

    /// Probe loop; runs until `shutdown` is cancelled.
    pub async fn run(
        self: Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        pools: Arc<ConfigStore>,
        shutdown: CancellationToken,
    ) {
        info!(
            "Health monitor started (interval {:?}, down after {} failed probes)",
            self.config.probe_interval, self.config.down_after
        );
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Health monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = pools.list();
                    self.probe_all(probe.as_ref(), &snapshot).await;
                }
            }
        }
    }

    async fn announce(&self, t: &Transition, pools: &[PoolConfig]) {
        // no receivers is fine
        let _ = self.transitions.send(t.clone());
        match t.to {
            ParticipantState::Down => warn!("Participant {} is down (was {})", t.participant, t.from),
            ParticipantState::Suspect => debug!("Participant {} is suspect", t.participant),
            ParticipantState::Up => info!("Participant {} is up (was {})", t.participant, t.from),
        }
        self.publish(DomainEvent::participant_state_changed(
            &t.participant,
            t.from,
            t.to,
        ))
        .await;

        for pool in pools.iter().filter(|p| p.contains(&t.participant)) {
            self.evaluate(pool).await;
        }
    }

    async fn publish(&self, event: DomainEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("Failed to publish health event: {}", e);
        }
    }
}
