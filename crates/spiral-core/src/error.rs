//! Error types for the memory engine.

use spiral_state::StorageError;

/// Errors produced by engine operations.
///
/// A missing node is not an error: lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine not initialized: call initialize() first")]
    NotInitialized,

    #[error("partition capacity exceeded: all {max_partitions} partitions are full")]
    CapacityExceeded { max_partitions: usize },

    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StorageError),

    #[error("GC leadership lost for shard {shard_id}")]
    LeadershipLost { shard_id: u32 },

    #[error("invalid tier: {0}")]
    InvalidTier(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
