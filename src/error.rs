//! Error types for Streamward

/// Result type alias for Streamward operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Streamward.
///
/// The enum is `Clone` because the request deduplicator fans a single
/// completion result out to every caller that piled onto the in-flight
/// request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The target index does not exist. Idempotent actions absorb this as success.
    #[error("no such index [{0}]")]
    IndexNotFound(String),
    /// An index with the requested name already exists
    #[error("resource already exists [{0}]")]
    ResourceAlreadyExists(String),
    /// The index is part of a snapshot that is currently running
    #[error("cannot delete index [{0}] while a snapshot is in progress")]
    SnapshotInProgress(String),
    /// The cluster accepted the request but did not acknowledge it
    #[error("{0}")]
    NotAcknowledged(String),
    /// One or more shards failed to apply the requested operation
    #[error("shard failures: [{0}]")]
    ShardFailures(String),
    /// Transport-level failure talking to the rest of the cluster
    #[error("transport error: {0}")]
    Transport(String),
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
