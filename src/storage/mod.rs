//! Local entity store contract.
//!
//! `EntityStore` is the narrow persistence trait the cache core consumes.
//! Implementors persist entities by id within a pathname-rooted collection
//! (`/{namespace}/{appKey}/{collection}`) and execute queries locally with
//! the same semantics as the network gateway.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::query::Query;

pub use memory::MemoryStore;

/// Options for store reads.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Advisory freshness hint. Implementations may treat entities older
    /// than this as absent; the bundled memory store ignores it.
    pub ttl: Option<Duration>,
}

/// Pathname-rooted entity persistence.
///
/// Implementors must be `Send + Sync` so stores can be shared across tasks.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Execute `query` against a collection and return matching entities.
    async fn get(
        &self,
        path: &str,
        query: &Query,
        options: &GetOptions,
    ) -> Result<Vec<Value>, StorageError>;

    /// Fetch one entity by id. `NotFound` if absent.
    async fn get_by_id(
        &self,
        path: &str,
        id: &str,
        options: &GetOptions,
    ) -> Result<Value, StorageError>;

    /// Insert or replace an entity. The entity must carry an id; the stored
    /// entity is returned.
    async fn put(&self, path: &str, entity: Value) -> Result<Value, StorageError>;

    /// Delete matching entities, returning how many were removed.
    async fn delete(&self, path: &str, query: &Query) -> Result<usize, StorageError>;

    /// Delete one entity by id, returning the removal count (0 or 1).
    async fn delete_by_id(&self, path: &str, id: &str) -> Result<usize, StorageError>;

    /// Count matching entities.
    async fn count(&self, path: &str, query: &Query) -> Result<usize, StorageError>;
}
