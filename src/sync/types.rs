//! Result and failure types for push/pull synchronization.

use std::fmt;

use serde_json::Value;

use crate::error::{NetworkError, SyncError, TideStoreError};

/// Why one pending entity failed to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFailure {
    Network(NetworkError),
    /// A removal reported an unexpected count.
    CountMismatch { expected: usize, actual: usize },
    /// The local store failed while committing the reconciled state.
    Storage(String),
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFailure::Network(e) => write!(f, "{e}"),
            SyncFailure::CountMismatch { expected, actual } => {
                write!(f, "expected to remove {expected} entities, removed {actual}")
            }
            SyncFailure::Storage(msg) => write!(f, "{msg}"),
        }
    }
}

impl SyncFailure {
    pub fn is_insufficient_credentials(&self) -> bool {
        matches!(self, SyncFailure::Network(NetworkError::InsufficientCredentials))
    }
}

impl From<SyncFailure> for TideStoreError {
    fn from(failure: SyncFailure) -> Self {
        match failure {
            SyncFailure::Network(e) => TideStoreError::Network(e),
            SyncFailure::CountMismatch { expected, actual } => {
                TideStoreError::Sync(SyncError::CountMismatch { expected, actual })
            }
            SyncFailure::Storage(msg) => TideStoreError::Internal(msg),
        }
    }
}

/// One reconciled pending entity. `entity` carries the backend's stored
/// shape for creates and updates; removals carry `None`.
#[derive(Debug, Clone)]
pub struct PushSuccess {
    /// The id the ledger tracked — the temp id for offline creates.
    pub id: String,
    pub entity: Option<Value>,
}

/// One pending entity that failed to reconcile. Whether the ledger entry
/// survived depends on the failure classification.
#[derive(Debug, Clone)]
pub struct PushError {
    pub id: String,
    pub error: SyncFailure,
}

/// Outcome of draining a collection's ledger.
#[derive(Debug, Clone)]
pub struct PushResult {
    pub collection: String,
    pub success: Vec<PushSuccess>,
    pub error: Vec<PushError>,
}

impl PushResult {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            success: Vec::new(),
            error: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_empty()
    }
}

/// Result of the composite sync: push, then pull.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub push: PushResult,
    pub pull: Vec<Value>,
}
