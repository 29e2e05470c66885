//! Capacity accounting.
//!
//! Every ShardSet puts one shard of identical length on each of k+m
//! participants, so the smallest of the chosen participants bounds the shard
//! length and usable data capacity scales with k.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pool::types::Participant;

/// Usable capacity of a pool for a given (k, m).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolCapacity {
    pub data_shards: usize,
    pub parity_shards: usize,
    /// Smallest free space among the k+m participants with the most room
    pub min_free_bytes: u64,
    /// min_free_bytes × k
    pub usable_bytes: u64,
    /// Sum of free bytes over every candidate
    pub raw_free_bytes: u64,
}

impl PoolCapacity {
    /// Length of each shard (data and parity) for an object.
    pub fn shard_bytes(&self, object_size: u64) -> u64 {
        shard_bytes(object_size, self.data_shards)
    }

    /// Raw bytes consumed across all participants by one object.
    pub fn stored_bytes(&self, object_size: u64) -> u64 {
        self.shard_bytes(object_size) * (self.data_shards + self.parity_shards) as u64
    }

    /// Whether an object of this size still fits.
    pub fn fits(&self, object_size: u64) -> bool {
        self.shard_bytes(object_size) <= self.min_free_bytes
    }
}

/// Compute usable capacity over a candidate participant set.
///
/// The k+m participants with the most free space are the ones a space-first
/// placement would pick; their minimum bounds the shard size.
pub fn compute_capacity(
    participants: &[Participant],
    data_shards: usize,
    parity_shards: usize,
) -> Result<PoolCapacity> {
    if data_shards == 0 {
        return Err(Error::Validation("k (data shards) must be at least 1".to_string()));
    }

    let required = data_shards + parity_shards;
    if participants.len() < required {
        return Err(Error::InsufficientParticipants {
            available: participants.len(),
            required,
        });
    }

    let mut free: Vec<u64> = participants.iter().map(|p| p.free_bytes).collect();
    free.sort_unstable_by(|a, b| b.cmp(a));
    let min_free_bytes = free[required - 1];

    Ok(PoolCapacity {
        data_shards,
        parity_shards,
        min_free_bytes,
        usable_bytes: min_free_bytes.saturating_mul(data_shards as u64),
        raw_free_bytes: free.iter().fold(0u64, |acc, f| acc.saturating_add(*f)),
    })
}

/// `ceil(object_size / k)`; parity shards have the same length.
pub fn shard_bytes(object_size: u64, data_shards: usize) -> u64 {
    object_size.div_ceil(data_shards.max(1) as u64).max(1)
}

/// Storage overhead ratio (total/data)
pub fn storage_overhead(data_shards: usize, parity_shards: usize) -> f64 {
    (data_shards + parity_shards) as f64 / data_shards as f64
}

/// Storage efficiency ratio (data/total)
pub fn storage_efficiency(data_shards: usize, parity_shards: usize) -> f64 {
    data_shards as f64 / (data_shards + parity_shards) as f64
}
