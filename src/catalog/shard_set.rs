//! ShardSet and Shard records.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::ports::ShardKey;
use crate::ec::{EncodedObject, ShardChecksum, ShardManifest};
use crate::error::{Error, Result};
use crate::pool::types::ParticipantId;

/// Identifier of one ShardSet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardSetId(Uuid);

impl ShardSetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ShardSetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ShardSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ShardSetId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Validation(format!("invalid shard set id '{}': {}", s, e)))
    }
}

/// Lifecycle of a single shard copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    #[default]
    Present,
    Missing,
    Reconstructing,
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardStatus::Present => write!(f, "present"),
            ShardStatus::Missing => write!(f, "missing"),
            ShardStatus::Reconstructing => write!(f, "reconstructing"),
        }
    }
}

/// One shard of a ShardSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    pub shard_set: ShardSetId,
    pub index: usize,
    pub len: u64,
    pub checksum: ShardChecksum,
    pub location: ParticipantId,
    pub status: ShardStatus,
}

/// Per-object redundancy summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectHealth {
    /// All k+m shards available
    Healthy,
    /// At least k but fewer than k+m available
    Degraded,
    /// Fewer than k available
    Lost,
}

impl fmt::Display for ObjectHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectHealth::Healthy => write!(f, "healthy"),
            ObjectHealth::Degraded => write!(f, "degraded"),
            ObjectHealth::Lost => write!(f, "lost"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHealth {
    pub available: usize,
    pub total: usize,
    pub state: ObjectHealth,
}

/// The complete k+m shard group of one logical object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSet {
    pub id: ShardSetId,
    pub pool: String,
    pub object: String,
    pub object_size: u64,
    pub data_shards: usize,
    pub parity_shards: usize,
    pub shard_len: u64,
    pub shards: Vec<Shard>,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShardSet {
    /// Build the record for a freshly encoded object; `targets[i]` hosts shard `i`.
    pub fn from_encoded(
        pool: &str,
        object: &str,
        encoded: &EncodedObject,
        targets: &[ParticipantId],
        data_shards: usize,
        parity_shards: usize,
    ) -> Result<Self> {
        if targets.len() != encoded.shards.len() {
            return Err(Error::Internal(format!(
                "{} targets for {} shards",
                targets.len(),
                encoded.shards.len()
            )));
        }

        let id = ShardSetId::new();
        let shards = encoded
            .shards
            .iter()
            .zip(targets)
            .map(|(s, location)| Shard {
                shard_set: id,
                index: s.index,
                len: s.bytes.len() as u64,
                checksum: s.checksum.clone(),
                location: location.clone(),
                status: ShardStatus::Present,
            })
            .collect();

        let now = Utc::now();
        let set = Self {
            id,
            pool: pool.to_string(),
            object: object.to_string(),
            object_size: encoded.manifest.original_len,
            data_shards,
            parity_shards,
            shard_len: encoded.manifest.shard_len,
            shards,
            generation: 1,
            created_at: now,
            updated_at: now,
        };
        set.check_distinct()?;
        Ok(set)
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn is_data_shard(&self, index: usize) -> bool {
        index < self.data_shards
    }

    pub fn manifest(&self) -> ShardManifest {
        ShardManifest {
            original_len: self.object_size,
            shard_len: self.shard_len,
            checksums: self.shards.iter().map(|s| s.checksum.clone()).collect(),
        }
    }

    pub fn key(&self, index: usize) -> ShardKey {
        ShardKey::new(&self.pool, self.id, index)
    }

    pub fn shard(&self, index: usize) -> Option<&Shard> {
        self.shards.get(index)
    }

    /// No two shards may share a participant.
    pub fn check_distinct(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for shard in &self.shards {
            if !seen.insert(&shard.location) {
                return Err(Error::Internal(format!(
                    "shard set {} places two shards on {}",
                    self.id, shard.location
                )));
            }
        }
        Ok(())
    }

    pub fn uses(&self, participant: &ParticipantId) -> bool {
        self.shards.iter().any(|s| &s.location == participant)
    }

    /// Redundancy summary given which participants are currently down.
    pub fn health<F>(&self, is_down: F) -> ShardHealth
    where
        F: Fn(&ParticipantId) -> bool,
    {
        let available = self
            .shards
            .iter()
            .filter(|s| s.status == ShardStatus::Present && !is_down(&s.location))
            .count();
        let total = self.total_shards();
        let state = if available >= total {
            ObjectHealth::Healthy
        } else if available >= self.data_shards {
            ObjectHealth::Degraded
        } else {
            ObjectHealth::Lost
        };
        ShardHealth {
            available,
            total,
            state,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.generation += 1;
        self.updated_at = Utc::now();
    }
}
