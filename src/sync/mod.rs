//! The sync engine: pending-mutation ledger, push, pull, delta fetch, and
//! the composite sync operation.

pub mod delta;
pub mod ledger;
pub mod pull;
pub mod push;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::OwnedMutexGuard;

use crate::config::StoreConfig;
use crate::error::{Result, TideStoreError};
use crate::network::NetworkGateway;
use crate::storage::EntityStore;

pub use ledger::{LedgerEntry, LedgerRecord, SyncLedger};
pub use types::{PushError, PushResult, PushSuccess, SyncFailure, SyncOutcome};

// ============================================================================
// LockRegistry
// ============================================================================

/// Per-collection async locks serializing ledger writers.
///
/// Every cache store instance for the same collection must share one
/// registry; the registry is keyed by collection name, so stores for
/// different collections never contend.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, collection: &str) -> Arc<TokioMutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(collection.to_string())
            .or_insert_with(|| Arc::new(TokioMutex::new(())))
            .clone()
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Shared machinery behind a cache store: the entity store, the gateway, the
/// ledger, and the per-collection serialization primitive.
pub struct SyncEngine {
    collection: String,
    config: Arc<StoreConfig>,
    store: Arc<dyn EntityStore>,
    gateway: Arc<dyn NetworkGateway>,
    ledger: SyncLedger,
    locks: Arc<LockRegistry>,
}

impl SyncEngine {
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn EntityStore>,
        gateway: Arc<dyn NetworkGateway>,
        config: Arc<StoreConfig>,
        locks: Arc<LockRegistry>,
    ) -> Result<Self> {
        let collection = collection.into();
        if collection.is_empty() {
            return Err(TideStoreError::InvalidArgument(
                "collection name must not be empty".to_string(),
            ));
        }
        let ledger = SyncLedger::new(Arc::clone(&store), Arc::clone(&config));
        Ok(Self {
            collection,
            config,
            store,
            gateway,
            ledger,
            locks,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn config(&self) -> &Arc<StoreConfig> {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn NetworkGateway> {
        &self.gateway
    }

    pub fn ledger(&self) -> &SyncLedger {
        &self.ledger
    }

    /// Pathname of this collection in the entity namespace.
    pub fn entity_path(&self) -> String {
        self.config.collection_path(&self.collection)
    }

    /// Acquire this collection's write lock. Held across ledger
    /// read-modify-write sequences and across an entire push.
    pub(crate) async fn acquire_collection_lock(&self) -> OwnedMutexGuard<()> {
        self.locks.get(&self.collection).lock_owned().await
    }

    /// Append pending entries under the collection lock — the write half of
    /// every mutating facade operation.
    pub(crate) async fn enqueue(&self, entries: &[(String, Option<String>)]) -> Result<()> {
        let _guard = self.acquire_collection_lock().await;
        self.ledger.append(&self.collection, entries).await?;
        Ok(())
    }

    /// Drop pending entries without pushing.
    pub(crate) async fn clear_pending(&self, ids: Option<&[String]>) -> Result<usize> {
        let _guard = self.acquire_collection_lock().await;
        Ok(self.ledger.clear(&self.collection, ids).await?)
    }
}
