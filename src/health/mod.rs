//! Health Module
//!
//! Per-participant reachability state and the pool health derived from it.
//!
//! ```text
//!            fail x suspect_after        fail x down_after
//!     ┌────┐ ───────────────────▶ ┌─────────┐ ─────────────▶ ┌──────┐
//!     │ Up │                      │ Suspect │                │ Down │
//!     └────┘ ◀─────────────────── └─────────┘                └──────┘
//!        ▲          ok                                           │
//!        └───────────────────── ok x recover_after ──────────────┘
//! ```
//!
//! Pool health is a pure function of how many participants are `Down`:
//! zero is `Healthy`, up to m is `Degraded`, more than m is `Unavailable`.

mod monitor;

pub use monitor::{HealthMonitor, PoolHealthReport, Transition};

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pool::types::{ParticipantId, PoolConfig};

/// Debounced reachability of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantState {
    Up,
    Suspect,
    Down,
}

impl fmt::Display for ParticipantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantState::Up => write!(f, "up"),
            ParticipantState::Suspect => write!(f, "suspect"),
            ParticipantState::Down => write!(f, "down"),
        }
    }
}

/// Pool-level health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolHealth {
    Healthy,
    Degraded,
    Unavailable,
}

impl PoolHealth {
    /// Healthy or degraded pools admit writes.
    pub fn is_operational(&self) -> bool {
        matches!(self, PoolHealth::Healthy | PoolHealth::Degraded)
    }

    pub fn classify(down: usize, parity_shards: usize) -> Self {
        if down == 0 {
            PoolHealth::Healthy
        } else if down <= parity_shards {
            PoolHealth::Degraded
        } else {
            PoolHealth::Unavailable
        }
    }

    /// Numeric level for gauges: 0 healthy, 1 degraded, 2 unavailable.
    pub fn level(&self) -> i64 {
        match self {
            PoolHealth::Healthy => 0,
            PoolHealth::Degraded => 1,
            PoolHealth::Unavailable => 2,
        }
    }
}

impl fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolHealth::Healthy => write!(f, "healthy"),
            PoolHealth::Degraded => write!(f, "degraded"),
            PoolHealth::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Point-in-time copy of participant states handed to the planner.
///
/// Participants absent from the snapshot are considered `Up`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthSnapshot {
    states: HashMap<ParticipantId, ParticipantState>,
}

impl HealthSnapshot {
    pub fn all_up() -> Self {
        Self::default()
    }

    pub fn from_states(states: impl IntoIterator<Item = (ParticipantId, ParticipantState)>) -> Self {
        Self {
            states: states.into_iter().collect(),
        }
    }

    pub fn with(mut self, participant: ParticipantId, state: ParticipantState) -> Self {
        self.states.insert(participant, state);
        self
    }

    pub fn state(&self, participant: &ParticipantId) -> ParticipantState {
        self.states
            .get(participant)
            .copied()
            .unwrap_or(ParticipantState::Up)
    }

    pub fn is_up(&self, participant: &ParticipantId) -> bool {
        self.state(participant) == ParticipantState::Up
    }

    pub fn is_down(&self, participant: &ParticipantId) -> bool {
        self.state(participant) == ParticipantState::Down
    }

    pub fn down_count(&self, pool: &PoolConfig) -> usize {
        pool.participants
            .iter()
            .filter(|p| self.is_down(&p.id()))
            .count()
    }

    pub fn pool_health(&self, pool: &PoolConfig) -> PoolHealth {
        PoolHealth::classify(self.down_count(pool), pool.parity_shards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(PoolHealth::classify(0, 2), PoolHealth::Healthy);
        assert_eq!(PoolHealth::classify(1, 2), PoolHealth::Degraded);
        assert_eq!(PoolHealth::classify(2, 2), PoolHealth::Degraded);
        assert_eq!(PoolHealth::classify(3, 2), PoolHealth::Unavailable);
        assert_eq!(PoolHealth::classify(1, 0), PoolHealth::Unavailable);
    }

    #[test]
    fn test_operational() {
        assert!(PoolHealth::Healthy.is_operational());
        assert!(PoolHealth::Degraded.is_operational());
        assert!(!PoolHealth::Unavailable.is_operational());
    }

    #[test]
    fn test_snapshot_defaults_to_up() {
        let down = ParticipantId::new("n1", "/d");
        let snap = HealthSnapshot::all_up().with(down.clone(), ParticipantState::Down);
        assert!(snap.is_down(&down));
        assert!(snap.is_up(&ParticipantId::new("n2", "/d")));
    }
}
