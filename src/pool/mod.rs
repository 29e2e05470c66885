//! Pool Module
//!
//! Pool definitions ([`types`]) and the [`ConfigStore`] that validates,
//! persists and serializes changes to them.

mod config_store;
pub mod types;

pub use config_store::{ConfigStore, PoolDeletion, TopologyChange};
pub use types::{
    DiskStatus, Participant, ParticipantId, PlacementStrategy, PoolConfig, PoolScope, PoolSpec,
};
