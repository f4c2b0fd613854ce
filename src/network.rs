//! Network gateway contract.
//!
//! The gateway executes remote CRUD with authentication against the same
//! pathname shape the entity store uses, plus the delta-fetch conditional
//! query and the backend `_count`/`_group` endpoints. Implementations
//! surface the typed errors in [`crate::error::NetworkError`]; everything
//! the core's failure classifier cannot name goes through
//! `NetworkError::Transport`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::aggregation::Aggregation;
use crate::error::NetworkError;
use crate::query::Query;
use crate::types::OperationOptions;

/// Per-request options forwarded to the gateway.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    /// Opaque per-request metadata (custom headers, trace ids, …).
    pub properties: Option<Value>,
}

impl From<&OperationOptions> for RequestOptions {
    fn from(options: &OperationOptions) -> Self {
        Self {
            timeout: options.timeout,
            properties: options.properties.clone(),
        }
    }
}

/// Remote CRUD with authentication.
#[async_trait]
pub trait NetworkGateway: Send + Sync {
    /// Execute `query` remotely and return matching entities.
    async fn find(
        &self,
        path: &str,
        query: &Query,
        options: &RequestOptions,
    ) -> Result<Vec<Value>, NetworkError>;

    /// Fetch one entity by id. `NotFound` if absent upstream.
    async fn find_by_id(
        &self,
        path: &str,
        id: &str,
        options: &RequestOptions,
    ) -> Result<Value, NetworkError>;

    /// Delta fetch: only entities matching `query` whose last-modified
    /// timestamp exceeds `since` (RFC 3339).
    async fn find_changed_since(
        &self,
        path: &str,
        query: &Query,
        since: &str,
        options: &RequestOptions,
    ) -> Result<Vec<Value>, NetworkError>;

    /// POST a new entity; the backend assigns the canonical id and returns
    /// the stored entity.
    async fn create(
        &self,
        path: &str,
        entity: &Value,
        options: &RequestOptions,
    ) -> Result<Value, NetworkError>;

    /// PUT an entity at its id, returning the stored entity.
    async fn update(
        &self,
        path: &str,
        id: &str,
        entity: &Value,
        options: &RequestOptions,
    ) -> Result<Value, NetworkError>;

    /// DELETE matching entities, returning the removal count.
    async fn remove(
        &self,
        path: &str,
        query: &Query,
        options: &RequestOptions,
    ) -> Result<usize, NetworkError>;

    /// DELETE one entity by id, returning the removal count.
    async fn remove_by_id(
        &self,
        path: &str,
        id: &str,
        options: &RequestOptions,
    ) -> Result<usize, NetworkError>;

    /// Remote `_count`.
    async fn count(
        &self,
        path: &str,
        query: &Query,
        options: &RequestOptions,
    ) -> Result<usize, NetworkError>;

    /// Remote `_group`.
    async fn group(
        &self,
        path: &str,
        aggregation: &Aggregation,
        options: &RequestOptions,
    ) -> Result<Vec<Value>, NetworkError>;
}
