//! In-memory entity store: nested maps guarded by a parking_lot mutex.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StorageError;
use crate::query::Query;
use crate::types::entity_id;

use super::{EntityStore, GetOptions};

/// Process-local store used in tests and as the default local replica.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, path: &str) -> Vec<Value> {
        self.collections
            .lock()
            .get(path)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    fn query_error(e: crate::error::TideStoreError) -> StorageError {
        StorageError::InvalidQuery(e.to_string())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(
        &self,
        path: &str,
        query: &Query,
        _options: &GetOptions,
    ) -> Result<Vec<Value>, StorageError> {
        query.apply(self.snapshot(path)).map_err(Self::query_error)
    }

    async fn get_by_id(
        &self,
        path: &str,
        id: &str,
        _options: &GetOptions,
    ) -> Result<Value, StorageError> {
        self.collections
            .lock()
            .get(path)
            .and_then(|c| c.get(id))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                collection: path.to_string(),
                id: id.to_string(),
            })
    }

    async fn put(&self, path: &str, entity: Value) -> Result<Value, StorageError> {
        let id = entity_id(&entity)
            .ok_or_else(|| StorageError::MissingId {
                collection: path.to_string(),
            })?
            .to_string();
        self.collections
            .lock()
            .entry(path.to_string())
            .or_default()
            .insert(id, entity.clone());
        Ok(entity)
    }

    async fn delete(&self, path: &str, query: &Query) -> Result<usize, StorageError> {
        let mut collections = self.collections.lock();
        let Some(collection) = collections.get_mut(path) else {
            return Ok(0);
        };
        let mut doomed = Vec::new();
        for (id, entity) in collection.iter() {
            if query.matches(entity).map_err(Self::query_error)? {
                doomed.push(id.clone());
            }
        }
        let mut removed = 0;
        for id in doomed {
            if collection.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_by_id(&self, path: &str, id: &str) -> Result<usize, StorageError> {
        let removed = self
            .collections
            .lock()
            .get_mut(path)
            .and_then(|c| c.remove(id))
            .is_some();
        Ok(usize::from(removed))
    }

    async fn count(&self, path: &str, query: &Query) -> Result<usize, StorageError> {
        let mut n = 0;
        for entity in self.snapshot(path) {
            if query.matches(&entity).map_err(Self::query_error)? {
                n += 1;
            }
        }
        Ok(n)
    }
}
