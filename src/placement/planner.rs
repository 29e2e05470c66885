//! Placement planner: initial shard assignment and repair re-placement.

use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};

use crate::catalog::{ShardSet, ShardStatus};
use crate::error::{Error, Result};
use crate::health::HealthSnapshot;
use crate::pool::types::{DiskStatus, Participant, ParticipantId, PlacementStrategy, PoolConfig};
use crate::rebalance::{RebalancePlan, ShardMove};

/// Where the shards of one new ShardSet go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// `targets[i]` hosts shard `i`
    pub targets: Vec<ParticipantId>,
    /// Cursor to persist for the next ShardSet
    pub next_cursor: u64,
}

/// Strategy-driven shard placement.
#[derive(Debug, Clone)]
pub struct PlacementPlanner {
    /// Usage ratio at which `fill` moves on to the next group
    fill_threshold: f64,
}

impl Default for PlacementPlanner {
    fn default() -> Self {
        Self::new(90)
    }
}

impl PlacementPlanner {
    pub fn new(fill_threshold_percent: u8) -> Self {
        Self {
            fill_threshold: f64::from(fill_threshold_percent.clamp(1, 100)) / 100.0,
        }
    }

    /// Choose k+m distinct participants for a new ShardSet of `shard_len`
    /// bytes per shard.
    #[instrument(skip(self, pool, health), fields(pool = %pool.name, strategy = %pool.strategy))]
    pub fn assign(
        &self,
        pool: &PoolConfig,
        health: &HealthSnapshot,
        shard_len: u64,
    ) -> Result<Placement> {
        let required = pool.total_shards();
        let candidates: Vec<&Participant> = pool
            .participants
            .iter()
            .filter(|p| is_live(p, health) && p.free_bytes >= shard_len)
            .collect();

        if candidates.len() < required {
            return Err(Error::PlacementInfeasible {
                pool: pool.name.clone(),
                live: candidates.len(),
                required,
            });
        }

        let ranked = self.rank(pool.strategy, candidates, pool.cursor);
        let targets: Vec<ParticipantId> = ranked.iter().take(required).map(|p| p.id()).collect();

        let next_cursor = match pool.strategy {
            PlacementStrategy::RoundRobin => pool.cursor.wrapping_add(required as u64),
            PlacementStrategy::NodeSpread => pool.cursor.wrapping_add(1),
            PlacementStrategy::SpaceFirst | PlacementStrategy::Fill => pool.cursor,
        };

        debug!("Assigned {} shards: {:?}", required, targets);
        Ok(Placement {
            targets,
            next_cursor,
        })
    }

    /// Plan the moves that restore full fault tolerance for existing
    /// ShardSets. Compliant shards never move.
    ///
    /// A shard is non-compliant when its participant left the pool, is
    /// `Down`, already hosts another shard of the same set, or the shard
    /// itself is recorded `Missing`/`Reconstructing`.
    #[instrument(skip(self, pool, shard_sets, health), fields(pool = %pool.name, sets = shard_sets.len()))]
    pub fn reassign(
        &self,
        pool: &PoolConfig,
        shard_sets: &[ShardSet],
        health: &HealthSnapshot,
    ) -> Result<RebalancePlan> {
        let required = pool.total_shards();
        let live: Vec<&Participant> = pool
            .participants
            .iter()
            .filter(|p| is_live(p, health))
            .collect();

        if live.len() < required {
            return Err(Error::PlacementInfeasible {
                pool: pool.name.clone(),
                live: live.len(),
                required,
            });
        }

        // bytes and shard counts already promised to each destination
        let mut reserved: HashMap<ParticipantId, u64> = HashMap::new();
        let mut assigned: HashMap<ParticipantId, usize> = HashMap::new();
        let mut moves = Vec::new();

        for set in shard_sets {
            let mut occupied: HashSet<ParticipantId> = HashSet::new();
            let mut pending = Vec::new();

            for shard in &set.shards {
                let compliant = pool.contains(&shard.location)
                    && !health.is_down(&shard.location)
                    && shard.status == ShardStatus::Present
                    && !occupied.contains(&shard.location);
                if compliant {
                    occupied.insert(shard.location.clone());
                } else {
                    pending.push(shard);
                }
            }

            for shard in pending {
                let destination = self
                    .pick_destination(pool.strategy, &live, &occupied, shard.len, &reserved, &assigned)
                    .ok_or_else(|| Error::PlacementInfeasible {
                        pool: pool.name.clone(),
                        live: live.len(),
                        required,
                    })?;

                let reconstruct =
                    shard.status != ShardStatus::Present || health.is_down(&shard.location);

                occupied.insert(destination.clone());
                *reserved.entry(destination.clone()).or_default() += shard.len;
                *assigned.entry(destination.clone()).or_default() += 1;

                moves.push(ShardMove {
                    shard_set: set.id,
                    object: set.object.clone(),
                    index: shard.index,
                    source: shard.location.clone(),
                    destination,
                    bytes: shard.len,
                    reconstruct,
                });
            }
        }

        debug!("Planned {} moves", moves.len());
        Ok(RebalancePlan::new(&pool.name, pool.generation, moves))
    }

    /// Best live participant for one displaced shard, honoring the
    /// strategy's preference. `None` when nothing fits.
    pub fn pick_destination(
        &self,
        strategy: PlacementStrategy,
        live: &[&Participant],
        occupied: &HashSet<ParticipantId>,
        shard_len: u64,
        reserved: &HashMap<ParticipantId, u64>,
        assigned: &HashMap<ParticipantId, usize>,
    ) -> Option<ParticipantId> {
        let room = |p: &Participant| {
            p.free_bytes
                .saturating_sub(reserved.get(&p.id()).copied().unwrap_or(0))
        };
        let mut options: Vec<(usize, &Participant)> = live
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| !occupied.contains(&p.id()) && room(*p) >= shard_len)
            .collect();

        match strategy {
            PlacementStrategy::SpaceFirst => {
                options.sort_by_key(|(order, p)| (std::cmp::Reverse(room(*p)), *order));
            }
            PlacementStrategy::RoundRobin => {
                options.sort_by_key(|(order, p)| {
                    (assigned.get(&p.id()).copied().unwrap_or(0), *order)
                });
            }
            PlacementStrategy::NodeSpread => {
                let busy_nodes: HashMap<&str, usize> =
                    occupied.iter().fold(HashMap::new(), |mut acc, id| {
                        *acc.entry(id.node_id.as_str()).or_default() += 1;
                        acc
                    });
                options.sort_by_key(|(order, p)| {
                    (
                        busy_nodes.get(p.node_id.as_str()).copied().unwrap_or(0),
                        std::cmp::Reverse(room(*p)),
                        *order,
                    )
                });
            }
            PlacementStrategy::Fill => {
                let threshold = self.fill_threshold;
                options.sort_by_key(|(order, p)| (p.usage_ratio() >= threshold, *order));
            }
        }

        options.first().map(|(_, p)| p.id())
    }

    /// Order candidates by strategy preference; ties keep insertion order.
    fn rank<'a>(
        &self,
        strategy: PlacementStrategy,
        mut candidates: Vec<&'a Participant>,
        cursor: u64,
    ) -> Vec<&'a Participant> {
        match strategy {
            PlacementStrategy::SpaceFirst => {
                // stable sort keeps insertion order among equals
                candidates.sort_by(|a, b| b.free_bytes.cmp(&a.free_bytes));
                candidates
            }
            PlacementStrategy::RoundRobin => {
                let start = (cursor % candidates.len() as u64) as usize;
                candidates.rotate_left(start);
                candidates
            }
            PlacementStrategy::NodeSpread => node_interleave(candidates, cursor),
            PlacementStrategy::Fill => {
                let threshold = self.fill_threshold;
                let (open, full): (Vec<_>, Vec<_>) = candidates
                    .into_iter()
                    .partition(|p| p.usage_ratio() < threshold);
                open.into_iter().chain(full).collect()
            }
        }
    }
}

/// Group by node in first-appearance order, then take one disk per node per
/// round. The starting node rotates with the cursor.
fn node_interleave(candidates: Vec<&Participant>, cursor: u64) -> Vec<&Participant> {
    let mut groups: Vec<(&str, Vec<&Participant>)> = Vec::new();
    for p in candidates {
        match groups.iter_mut().find(|(node, _)| *node == p.node_id) {
            Some((_, disks)) => disks.push(p),
            None => groups.push((p.node_id.as_str(), vec![p])),
        }
    }
    if groups.is_empty() {
        return Vec::new();
    }
    let start = (cursor % groups.len() as u64) as usize;
    groups.rotate_left(start);

    let rounds = groups.iter().map(|(_, d)| d.len()).max().unwrap_or(0);
    let mut ordered = Vec::new();
    for round in 0..rounds {
        for (_, disks) in &groups {
            if let Some(p) = disks.get(round) {
                ordered.push(*p);
            }
        }
    }
    ordered
}

fn is_live(p: &Participant, health: &HealthSnapshot) -> bool {
    p.status != DiskStatus::Offline && health.is_up(&p.id())
}
