//! Rebalance plans and execution reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ShardSetId;
use crate::error::{Error, Result};
use crate::pool::types::ParticipantId;

/// Relocation of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMove {
    pub shard_set: ShardSetId,
    pub object: String,
    pub index: usize,
    pub source: ParticipantId,
    pub destination: ParticipantId,
    pub bytes: u64,
    /// Source is known unreadable; the shard is rebuilt from peers
    pub reconstruct: bool,
}

impl fmt::Display for ShardMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} ({}) {} -> {}",
            self.shard_set, self.index, self.object, self.source, self.destination
        )
    }
}

/// Ordered list of moves for one pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub pool: String,
    pub moves: Vec<ShardMove>,
    pub dry_run: bool,
    pub estimated_bytes_moved: u64,
    /// Pool config generation the plan was computed against
    pub pool_generation: u64,
    pub created_at: DateTime<Utc>,
}

impl RebalancePlan {
    pub fn new(pool: impl Into<String>, pool_generation: u64, moves: Vec<ShardMove>) -> Self {
        let estimated_bytes_moved = moves.iter().map(|m| m.bytes).sum();
        Self {
            pool: pool.into(),
            moves,
            dry_run: true,
            estimated_bytes_moved,
            pool_generation,
            created_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    /// Same plan, armed for execution.
    pub fn for_execution(mut self) -> Self {
        self.dry_run = false;
        self
    }
}

impl PlanOutcome {
    pub fn from_plan(plan: &RebalancePlan) -> Self {
        if plan.is_empty() {
            PlanOutcome::Compliant
        } else {
            PlanOutcome::Planned {
                moves: plan.len(),
                estimated_bytes_moved: plan.estimated_bytes_moved,
            }
        }
    }
}

/// What a topology change produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanOutcome {
    /// Nothing needs to move
    Compliant,
    /// Moves were planned and handed to the executor
    Planned { moves: usize, estimated_bytes_moved: u64 },
    /// Too few live participants; the pool keeps serving degraded
    Infeasible { live: usize, required: usize },
    /// Planning failed for another reason
    Failed { reason: String },
}

// =============================================================================
// Execution Report
// =============================================================================

/// Terminal state of a plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    /// Every move committed
    Completed,
    /// Some moves failed; their sources were kept
    PartiallyCompleted,
    /// Cancelled or stopped by a health or capacity regression
    Aborted,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Completed => write!(f, "completed"),
            ExecutionState::PartiallyCompleted => write!(f, "partially_completed"),
            ExecutionState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Result of one move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MoveResult {
    Committed {
        destination: ParticipantId,
        reconstructed: bool,
        /// Destination differs from the planned one
        replanned: bool,
        /// Source copy could not be deleted and is left behind
        orphaned_source: bool,
    },
    Failed {
        reason: String,
    },
    /// Catalog changed since planning; nothing to do
    Skipped {
        reason: String,
    },
    /// Not attempted because the run was aborted
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub planned: ShardMove,
    pub result: MoveResult,
}

/// Final report of [`RebalanceEngine::execute`](super::RebalanceEngine::execute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub pool: String,
    pub state: ExecutionState,
    pub outcomes: Vec<MoveOutcome>,
    pub bytes_moved: u64,
    pub abort_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionReport {
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            state: ExecutionState::Running,
            outcomes: Vec::new(),
            bytes_moved: 0,
            abort_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record(&mut self, planned: ShardMove, result: MoveResult) {
        if matches!(result, MoveResult::Committed { .. }) {
            self.bytes_moved += planned.bytes;
        }
        self.outcomes.push(MoveOutcome { planned, result });
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.abort_reason.is_none() {
            self.abort_reason = Some(reason.into());
        }
    }

    /// Settle the terminal state.
    pub fn finish(&mut self) {
        self.state = if self.abort_reason.is_some() {
            ExecutionState::Aborted
        } else if self.failed() > 0 {
            ExecutionState::PartiallyCompleted
        } else {
            ExecutionState::Completed
        };
        self.finished_at = Some(Utc::now());
    }

    fn count(&self, pred: impl Fn(&MoveResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }

    pub fn committed(&self) -> usize {
        self.count(|r| matches!(r, MoveResult::Committed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, MoveResult::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, MoveResult::Skipped { .. }))
    }

    pub fn dropped(&self) -> usize {
        self.count(|r| matches!(r, MoveResult::Dropped))
    }

    pub fn is_success(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    /// `Err(RebalanceAborted)` for an aborted run, the report otherwise.
    pub fn into_result(self) -> Result<Self> {
        match (self.state, &self.abort_reason) {
            (ExecutionState::Aborted, reason) => Err(Error::RebalanceAborted {
                pool: self.pool.clone(),
                reason: reason.clone().unwrap_or_else(|| "aborted".to_string()),
            }),
            _ => Ok(self),
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}
