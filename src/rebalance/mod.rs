//! Rebalance Module
//!
//! ```text
//!   topology change ──▶ ConfigStore ──▶ TopologyObserver ──▶ plan ──▶ queue
//!                                                                      │
//!   reconcile tick ─────────────────────────────────────▶ plan ──▶ execute
//!                                                                      │
//!        per move: check cancel/health ─▶ recheck room ─▶ copy or rebuild
//!                  ─▶ verify ─▶ commit catalog ─▶ delete source
//! ```

mod engine;
mod plan;

pub use engine::RebalanceEngine;
pub use plan::{
    ExecutionReport, ExecutionState, MoveOutcome, MoveResult, PlanOutcome, RebalancePlan,
    ShardMove,
};
