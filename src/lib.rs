//! shardpool - Erasure-Coded Storage Pools
//!
//! Pools of (node, disk) participants that store objects as k data + m parity
//! shards, tolerating any m simultaneous shard losses without full
//! replication.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────┐
//!   put/get/delete ─▶│        PoolEngine        │◀─ pool admin
//!                    └──────────────────────────┘
//!        │               │              │               │
//!        ▼               ▼              ▼               ▼
//!  ErasureCodec   PlacementPlanner  ConfigStore    FileCatalog
//!        ▲               ▲              │               ▲
//!        │               │       topology change        │
//!        │         HealthMonitor        ▼               │
//!        └──────────────────────  RebalanceEngine ──────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Shard, metadata and event adapters for the domain ports
//! - [`catalog`] - Object name to ShardSet mapping
//! - [`config`] - Engine configuration
//! - [`domain`] - Ports and domain events
//! - [`ec`] - Erasure codec and capacity accounting
//! - [`engine`] - The [`PoolEngine`] facade
//! - [`error`] - Error types
//! - [`health`] - Participant and pool health
//! - [`metrics`] - Prometheus metrics
//! - [`placement`] - Shard placement strategies
//! - [`pool`] - Pool definitions and the config store
//! - [`rebalance`] - Rebalance planning and execution

pub mod adapters;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod ec;
pub mod engine;
pub mod error;
pub mod health;
pub mod metrics;
pub mod placement;
pub mod pool;
pub mod rebalance;
pub mod retry;

// Re-export commonly used types
pub use catalog::{FileCatalog, ObjectHealth, ShardSet, ShardSetId, ShardStatus};
pub use config::EngineConfig;
pub use ec::{compute_capacity, ErasureCodec, PoolCapacity};
pub use engine::{ObjectSummary, ParticipantStatus, PoolEngine, PoolStatus};
pub use error::{Error, Result};
pub use health::{HealthMonitor, ParticipantState, PoolHealth};
pub use placement::PlacementPlanner;
pub use pool::{
    ConfigStore, DiskStatus, Participant, ParticipantId, PlacementStrategy, PoolConfig, PoolScope,
    PoolSpec,
};
pub use rebalance::{ExecutionReport, RebalanceEngine, RebalancePlan};
pub use retry::RetryPolicy;
