//! Error types for the shardpool engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the shardpool engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration / Validation Errors
    // =========================================================================
    /// Rejected before any mutation (bad k/m, duplicate participants, bad name)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Engine configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Duration parse error
    #[error("Failed to parse duration: {0}")]
    DurationParse(String),

    // =========================================================================
    // Topology Errors
    // =========================================================================
    /// Fewer candidates than k+m
    #[error("Insufficient participants: have {available}, need {required}")]
    InsufficientParticipants { available: usize, required: usize },

    /// Live participants cannot host a full shard set
    #[error("Placement infeasible for pool {pool}: {live} live participants, need {required}")]
    PlacementInfeasible {
        pool: String,
        live: usize,
        required: usize,
    },

    /// Pool has more than m participants down
    #[error("Pool {pool} is unavailable: {down} participants down, tolerates {tolerated}")]
    PoolUnavailable {
        pool: String,
        down: usize,
        tolerated: usize,
    },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Encoding failed
    #[error("Encoding failed: {0}")]
    Encoding(String),

    /// Reconstruction failed for reasons other than shard count
    #[error("Reconstruction failed for {object}: {reason}")]
    Reconstruction { object: String, reason: String },

    /// Fewer than k valid shards; the object is lost
    #[error("Unrecoverable loss of {object}: {available} valid shards, need {required}")]
    UnrecoverableLoss {
        object: String,
        available: usize,
        required: usize,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Single shard read/write failure, retried with backoff
    #[error("Transient I/O error on {location}: {reason}")]
    TransientIo { location: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Rebalance Errors
    // =========================================================================
    /// Cancelled or hit a capacity regression; committed moves stay
    #[error("Rebalance of pool {pool} aborted: {reason}")]
    RebalanceAborted { pool: String, reason: String },

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// Pool not found
    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    /// Pool name already taken
    #[error("Pool already exists: {0}")]
    PoolAlreadyExists(String),

    /// Pool still referenced by objects
    #[error("Pool {pool} still holds {objects} objects; export them first or delete with force")]
    PoolInUse { pool: String, objects: usize },

    /// Object not found
    #[error("Object not found: {pool}/{object}")]
    ObjectNotFound { pool: String, object: String },

    /// Participant not part of the pool
    #[error("Participant {participant} not found in pool {pool}")]
    ParticipantNotFound { pool: String, participant: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransientIo { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// Shorthand for a transient I/O failure at a location
    pub fn transient(location: impl ToString, reason: impl ToString) -> Self {
        Error::TransientIo {
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }
}
