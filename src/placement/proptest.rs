//! Property-Based Tests for placement
//!
//! 1. **Distinct targets**: no strategy puts two shards on one participant
//! 2. **Live only**: targets are never Down
//! 3. **Repair keeps distinctness**: applying a repair plan leaves every set distinct
//! 4. **Idempotence**: replanning a repaired pool yields no moves

#![cfg(test)]

use std::collections::HashSet;

use proptest::prelude::*;

use super::PlacementPlanner;
use crate::catalog::ShardSet;
use crate::ec::ErasureCodec;
use crate::health::{HealthSnapshot, ParticipantState};
use crate::pool::types::{Participant, PlacementStrategy, PoolConfig, PoolSpec};

fn strategy_strategy() -> impl Strategy<Value = PlacementStrategy> {
    prop_oneof![
        Just(PlacementStrategy::SpaceFirst),
        Just(PlacementStrategy::RoundRobin),
        Just(PlacementStrategy::NodeSpread),
        Just(PlacementStrategy::Fill),
    ]
}

/// (k, m, per-participant (node, free bytes))
fn pool_strategy() -> impl Strategy<Value = (usize, usize, Vec<(u8, u64)>)> {
    (1usize..=4, 0usize..=2).prop_flat_map(|(k, m)| {
        let n = k + m;
        (
            Just(k),
            Just(m),
            prop::collection::vec((0u8..4, 100u64..10_000), n..n + 5),
        )
    })
}

fn build_pool(
    k: usize,
    m: usize,
    disks: &[(u8, u64)],
    strategy: PlacementStrategy,
    cursor: u64,
) -> PoolConfig {
    let participants = disks
        .iter()
        .enumerate()
        .map(|(i, (node, free))| Participant::new(format!("node{}", node), format!("/d{}", i), 10_000, *free))
        .collect();
    let mut pool = PoolConfig::from_spec(PoolSpec::new("p", k, m, participants).with_strategy(strategy));
    pool.cursor = cursor;
    pool
}

fn make_set(pool: &PoolConfig, planner: &PlacementPlanner, health: &HealthSnapshot) -> ShardSet {
    let codec = ErasureCodec::new(pool.data_shards, pool.parity_shards).unwrap();
    let encoded = codec.encode(&[7u8; 40]).unwrap();
    let placement = planner
        .assign(pool, health, encoded.manifest.shard_len)
        .unwrap();
    ShardSet::from_encoded(
        &pool.name,
        "obj",
        &encoded,
        &placement.targets,
        pool.data_shards,
        pool.parity_shards,
    )
    .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_assign_is_distinct(
        (k, m, disks) in pool_strategy(),
        strategy in strategy_strategy(),
        cursor in 0u64..64,
    ) {
        let pool = build_pool(k, m, &disks, strategy, cursor);
        let placement = PlacementPlanner::default()
            .assign(&pool, &HealthSnapshot::all_up(), 1)
            .unwrap();

        prop_assert_eq!(placement.targets.len(), k + m);
        let unique: HashSet<_> = placement.targets.iter().collect();
        prop_assert_eq!(unique.len(), k + m);
    }

    #[test]
    fn prop_assign_avoids_down(
        (k, m, disks) in pool_strategy(),
        strategy in strategy_strategy(),
        down in any::<prop::sample::Index>(),
    ) {
        let pool = build_pool(k, m, &disks, strategy, 0);
        let victim = pool.participants[down.index(pool.participants.len())].id();
        let health = HealthSnapshot::all_up().with(victim.clone(), ParticipantState::Down);

        match PlacementPlanner::default().assign(&pool, &health, 1) {
            Ok(placement) => prop_assert!(!placement.targets.contains(&victim)),
            // only possible when the pool had exactly k+m participants
            Err(_) => prop_assert_eq!(pool.participants.len(), k + m),
        }
    }

    #[test]
    fn prop_repair_restores_distinct_compliance(
        (k, m, disks) in pool_strategy(),
        strategy in strategy_strategy(),
        down in any::<prop::sample::Index>(),
    ) {
        let planner = PlacementPlanner::default();
        let pool = build_pool(k, m, &disks, strategy, 0);
        let mut set = make_set(&pool, &planner, &HealthSnapshot::all_up());

        let victim = set.shards[down.index(set.shards.len())].location.clone();
        let health = HealthSnapshot::all_up().with(victim.clone(), ParticipantState::Down);

        let plan = match planner.reassign(&pool, std::slice::from_ref(&set), &health) {
            Ok(plan) => plan,
            Err(_) => {
                prop_assert_eq!(pool.participants.len(), k + m);
                return Ok(());
            }
        };
        prop_assert_eq!(plan.len(), 1);

        for mv in &plan.moves {
            prop_assert_eq!(&set.shards[mv.index].location, &mv.source);
            set.shards[mv.index].location = mv.destination.clone();
        }
        prop_assert!(set.check_distinct().is_ok());
        prop_assert!(!set.uses(&victim));

        let again = planner.reassign(&pool, std::slice::from_ref(&set), &health).unwrap();
        prop_assert!(again.is_empty());
    }
}
