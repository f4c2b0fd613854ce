//! The pending-mutation ledger.
//!
//! One record per collection, persisted as a document in the reserved sync
//! collection through the entity store — ledger durability inherits the
//! store's durability model. The record is a set keyed by entity id, not a
//! log: reconciliation is idempotent per id and intent is inferred from
//! entity-store presence at push time, so repeated local mutations coalesce
//! into one pending entry.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::storage::{EntityStore, GetOptions};

/// State recorded for one pending entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Last-modified timestamp of the entity at enqueue time, if any.
    pub lmt: Option<String>,
}

/// Per-collection pending-mutation record.
///
/// Invariant: `size == entities.len()`. Mutate through [`insert`] and
/// [`remove`] to preserve it.
///
/// [`insert`]: LedgerRecord::insert
/// [`remove`]: LedgerRecord::remove
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    /// Document id — the collection name.
    pub id: String,
    pub entities: HashMap<String, LedgerEntry>,
    pub size: usize,
}

impl LedgerRecord {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            id: collection.into(),
            entities: HashMap::new(),
            size: 0,
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, lmt: Option<String>) {
        self.entities.insert(id.into(), LedgerEntry { lmt });
        self.size = self.entities.len();
    }

    /// Remove a pending entry. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let removed = self.entities.remove(id).is_some();
        self.size = self.entities.len();
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.entities.keys().cloned().collect()
    }
}

/// Reads and writes ledger records through the entity store.
///
/// The cache store is the only writer; callers serialize read-modify-write
/// sequences with the per-collection lock.
#[derive(Clone)]
pub struct SyncLedger {
    store: Arc<dyn EntityStore>,
    config: Arc<StoreConfig>,
}

impl SyncLedger {
    pub fn new(store: Arc<dyn EntityStore>, config: Arc<StoreConfig>) -> Self {
        Self { store, config }
    }

    /// Read the record for a collection. `NotFound` when none exists.
    pub async fn read(&self, collection: &str) -> Result<LedgerRecord, StorageError> {
        let doc = self
            .store
            .get_by_id(&self.config.ledger_path(), collection, &GetOptions::default())
            .await?;
        let record: LedgerRecord = serde_json::from_value(doc)?;
        Ok(record)
    }

    /// Persist a record, overwriting any previous one.
    pub async fn write(
        &self,
        collection: &str,
        record: &LedgerRecord,
    ) -> Result<(), StorageError> {
        let doc: Value = serde_json::to_value(record)?;
        self.store.put(&self.config.ledger_path(), doc).await?;
        Ok(())
    }

    /// Number of pending entries, optionally restricted to `ids`.
    /// A missing record counts as zero.
    pub async fn count(
        &self,
        collection: &str,
        ids: Option<&[String]>,
    ) -> Result<usize, StorageError> {
        let record = match self.read(collection).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        match ids {
            None => Ok(record.size),
            Some(ids) => Ok(ids.iter().filter(|id| record.contains(id)).count()),
        }
    }

    /// Append entries (id, lmt) to the record, creating it if missing.
    /// Callers hold the per-collection lock.
    pub async fn append(
        &self,
        collection: &str,
        entries: &[(String, Option<String>)],
    ) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut record = match self.read(collection).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => LedgerRecord::new(collection),
            Err(e) => return Err(e),
        };
        for (id, lmt) in entries {
            record.insert(id.clone(), lmt.clone());
        }
        self.write(collection, &record).await
    }

    /// Drop pending entries without pushing. `None` clears the whole record.
    /// Returns how many entries were dropped. Callers hold the
    /// per-collection lock.
    pub async fn clear(
        &self,
        collection: &str,
        ids: Option<&[String]>,
    ) -> Result<usize, StorageError> {
        let mut record = match self.read(collection).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e),
        };
        let dropped = match ids {
            None => {
                let n = record.size;
                record.entities.clear();
                record.size = 0;
                n
            }
            Some(ids) => ids.iter().filter(|id| record.remove(id)).count(),
        };
        self.write(collection, &record).await?;
        Ok(dropped)
    }
}
