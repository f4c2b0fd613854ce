use thiserror::Error;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Errors raised by the local entity store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entity not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Entity in collection \"{collection}\" has no id field")]
    MissingId { collection: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

// ---------------------------------------------------------------------------
// NetworkError
// ---------------------------------------------------------------------------

/// Typed errors surfaced by the network gateway.
///
/// `Clone` + `PartialEq` so push results can carry the failure per id and
/// tests can match on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("Entity not found on the backend")]
    NotFound,

    #[error("The credentials used to authenticate this request are not authorized")]
    InsufficientCredentials,

    #[error("The request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unable to reach the backend: {pending} entities need to be pushed first")]
    PendingSync { pending: usize },

    #[error("Expected to remove {expected} entities, removed {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// TideStoreError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TideStoreError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TideStoreError {
    /// True for a missing entity, whether the local store or the backend
    /// reported it.
    pub fn is_not_found(&self) -> bool {
        match self {
            TideStoreError::Storage(e) => e.is_not_found(),
            TideStoreError::Network(NetworkError::NotFound) => true,
            TideStoreError::Sync(SyncError::Network(NetworkError::NotFound)) => true,
            TideStoreError::Sync(SyncError::Storage(e)) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_pending_sync(&self) -> bool {
        matches!(self, TideStoreError::Sync(SyncError::PendingSync { .. }))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TideStoreError::Network(NetworkError::Timeout)
                | TideStoreError::Sync(SyncError::Network(NetworkError::Timeout))
        )
    }
}

/// Convenience alias — the default error type is `TideStoreError`.
pub type Result<T, E = TideStoreError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
