//! Placement Module
//!
//! Decides which participant hosts each shard, both for new ShardSets and
//! when existing ones must be repaired or moved.
//!
//! | Strategy      | New ShardSet                               | Repair destination       |
//! |---------------|--------------------------------------------|--------------------------|
//! | `space-first` | most free bytes first                      | most free bytes          |
//! | `round-robin` | rotate a persisted cursor over participants| fewest moves so far      |
//! | `node-spread` | one disk per node per round                | least used node          |
//! | `fill`        | first participants under the fill threshold| first non-full           |
//!
//! Every strategy only picks `Up` participants and never puts two shards of
//! one set on the same participant.

mod planner;

#[cfg(test)]
mod proptest;

pub use planner::{Placement, PlacementPlanner};
