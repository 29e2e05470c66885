//! Pool data model: participants, strategies and the durable pool definition.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest shard count GF(2^8) Reed-Solomon supports.
pub const MAX_TOTAL_SHARDS: usize = 256;

/// Longest accepted pool name.
pub const MAX_POOL_NAME_LEN: usize = 64;

// =============================================================================
// Participant
// =============================================================================

/// Identity of a (node, disk) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId {
    pub node_id: String,
    pub disk: String,
}

impl ParticipantId {
    pub fn new(node_id: impl Into<String>, disk: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            disk: disk.into(),
        }
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node_id, self.disk)
    }
}

impl FromStr for ParticipantId {
    type Err = Error;

    /// Parses `node:/mount/path`.
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((node, disk)) if !node.is_empty() && !disk.is_empty() => {
                Ok(Self::new(node, disk))
            }
            _ => Err(Error::Validation(format!(
                "participant must look like node:/mount, got '{}'",
                s
            ))),
        }
    }
}

/// Disk status reported by the node inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStatus {
    #[default]
    Online,
    Offline,
    Warning,
}

impl fmt::Display for DiskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskStatus::Online => write!(f, "online"),
            DiskStatus::Offline => write!(f, "offline"),
            DiskStatus::Warning => write!(f, "warning"),
        }
    }
}

/// One disk on one node contributing a shard slot to a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub node_id: String,
    pub disk_mount: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    #[serde(default)]
    pub status: DiskStatus,
}

impl Participant {
    pub fn new(
        node_id: impl Into<String>,
        disk_mount: impl Into<String>,
        total_bytes: u64,
        free_bytes: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            disk_mount: disk_mount.into(),
            total_bytes,
            free_bytes: free_bytes.min(total_bytes),
            status: DiskStatus::Online,
        }
    }

    pub fn id(&self) -> ParticipantId {
        ParticipantId::new(self.node_id.clone(), self.disk_mount.clone())
    }

    pub fn is(&self, id: &ParticipantId) -> bool {
        self.node_id == id.node_id && self.disk_mount == id.disk
    }

    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    /// Fraction of the disk in use, 1.0 for a zero-sized disk.
    pub fn usage_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.used_bytes() as f64 / self.total_bytes as f64
    }
}

// =============================================================================
// Strategy / Scope
// =============================================================================

/// How shards of a new ShardSet are spread over participants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    /// Most free bytes first
    #[default]
    SpaceFirst,
    /// Rotating cursor advanced by k+m per ShardSet
    RoundRobin,
    /// Distinct nodes before a second disk on any node
    NodeSpread,
    /// Exhaust one group of participants before the next
    Fill,
}

impl fmt::Display for PlacementStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlacementStrategy::SpaceFirst => write!(f, "space-first"),
            PlacementStrategy::RoundRobin => write!(f, "round-robin"),
            PlacementStrategy::NodeSpread => write!(f, "node-spread"),
            PlacementStrategy::Fill => write!(f, "fill"),
        }
    }
}

impl FromStr for PlacementStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "space-first" => Ok(PlacementStrategy::SpaceFirst),
            "round-robin" => Ok(PlacementStrategy::RoundRobin),
            "node-spread" => Ok(PlacementStrategy::NodeSpread),
            "fill" => Ok(PlacementStrategy::Fill),
            other => Err(Error::Validation(format!(
                "unknown placement strategy '{}'",
                other
            ))),
        }
    }
}

/// Whether a pool lives on one node or spans several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolScope {
    SingleNode,
    #[default]
    CrossNode,
}

impl fmt::Display for PoolScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolScope::SingleNode => write!(f, "single-node"),
            PoolScope::CrossNode => write!(f, "cross-node"),
        }
    }
}

impl FromStr for PoolScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "single-node" | "intra-node" => Ok(PoolScope::SingleNode),
            "cross-node" | "inter-node" => Ok(PoolScope::CrossNode),
            other => Err(Error::Validation(format!("unknown pool scope '{}'", other))),
        }
    }
}

// =============================================================================
// Pool definition
// =============================================================================

/// Request to create a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    pub data_shards: usize,
    pub parity_shards: usize,
    #[serde(default)]
    pub strategy: PlacementStrategy,
    #[serde(default)]
    pub scope: PoolScope,
    pub participants: Vec<Participant>,
}

impl PoolSpec {
    pub fn new(
        name: impl Into<String>,
        data_shards: usize,
        parity_shards: usize,
        participants: Vec<Participant>,
    ) -> Self {
        Self {
            name: name.into(),
            data_shards,
            parity_shards,
            strategy: PlacementStrategy::default(),
            scope: PoolScope::default(),
            participants,
        }
    }

    pub fn with_strategy(mut self, strategy: PlacementStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_scope(mut self, scope: PoolScope) -> Self {
        self.scope = scope;
        self
    }

    /// Full creation-time validation. Nothing is mutated on failure.
    pub fn validate(&self) -> Result<()> {
        validate_pool_name(&self.name)?;
        validate_redundancy(self.data_shards, self.parity_shards)?;
        validate_unique(&self.participants)?;

        let required = self.data_shards + self.parity_shards;
        if self.participants.len() < required {
            return Err(Error::Validation(format!(
                "pool {} needs at least {} participants for {}+{}, got {}",
                self.name,
                required,
                self.data_shards,
                self.parity_shards,
                self.participants.len()
            )));
        }

        validate_scope(self.scope, &self.participants)
    }
}

/// Durable pool definition; the single source of truth for topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    pub data_shards: usize,
    pub parity_shards: usize,
    pub strategy: PlacementStrategy,
    pub scope: PoolScope,
    /// Insertion order is the tie-break order for every strategy
    pub participants: Vec<Participant>,
    /// Round-robin / node-spread cursor
    #[serde(default)]
    pub cursor: u64,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PoolConfig {
    pub fn from_spec(spec: PoolSpec) -> Self {
        let now = Utc::now();
        Self {
            name: spec.name,
            data_shards: spec.data_shards,
            parity_shards: spec.parity_shards,
            strategy: spec.strategy,
            scope: spec.scope,
            participants: spec.participants,
            cursor: 0,
            generation: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is(id))
    }

    pub fn participant_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.is(id))
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participant(id).is_some()
    }

    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants.iter().map(Participant::id).collect()
    }

    /// Node ids in first-appearance order.
    pub fn nodes(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.participants
            .iter()
            .filter(|p| seen.insert(p.node_id.as_str()))
            .map(|p| p.node_id.as_str())
            .collect()
    }

    pub(crate) fn touch(&mut self) {
        self.generation += 1;
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Validation helpers
// =============================================================================

pub fn validate_pool_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("pool name must not be empty".to_string()));
    }
    if name.len() > MAX_POOL_NAME_LEN {
        return Err(Error::Validation(format!(
            "pool name longer than {} characters",
            MAX_POOL_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "pool name '{}' may only contain letters, digits, '-' and '_'",
            name
        )));
    }
    Ok(())
}

pub fn validate_redundancy(data_shards: usize, parity_shards: usize) -> Result<()> {
    if data_shards == 0 {
        return Err(Error::Validation("k (data shards) must be at least 1".to_string()));
    }
    if data_shards + parity_shards > MAX_TOTAL_SHARDS {
        return Err(Error::Validation(format!(
            "k+m must not exceed {}, got {}",
            MAX_TOTAL_SHARDS,
            data_shards + parity_shards
        )));
    }
    Ok(())
}

pub fn validate_unique(participants: &[Participant]) -> Result<()> {
    let mut seen = HashSet::new();
    for p in participants {
        if !seen.insert(p.id()) {
            return Err(Error::Validation(format!(
                "participant {} listed more than once",
                p.id()
            )));
        }
    }
    Ok(())
}

pub fn validate_scope(scope: PoolScope, participants: &[Participant]) -> Result<()> {
    let nodes: HashSet<&str> = participants.iter().map(|p| p.node_id.as_str()).collect();
    match scope {
        PoolScope::CrossNode if nodes.len() < 2 => Err(Error::Validation(
            "a cross-node pool must span at least 2 nodes".to_string(),
        )),
        PoolScope::SingleNode if nodes.len() > 1 => Err(Error::Validation(
            "a single-node pool must keep every disk on one node".to_string(),
        )),
        _ => Ok(()),
    }
}
