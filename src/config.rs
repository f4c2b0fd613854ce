//! Store-wide configuration: application key, reserved namespaces, and sync
//! tuning knobs.

use std::time::Duration;

use crate::error::{Result, TideStoreError};

/// Default namespace entity collections live under.
pub const DEFAULT_ENTITY_NAMESPACE: &str = "appdata";

/// Default name of the reserved collection holding sync ledger records.
pub const DEFAULT_SYNC_COLLECTION: &str = "sync";

/// Default bound on concurrent per-id push requests.
pub const DEFAULT_PUSH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Key of the owning application; part of every collection identity.
    pub app_key: String,
    /// Namespace entity collections are rooted under.
    pub entity_namespace: String,
    /// Reserved collection name for sync ledger records.
    pub sync_collection: String,
    /// Maximum concurrent per-id requests during a push.
    pub push_concurrency: usize,
    /// Whether find/find_by_id use delta fetch when the caller does not say.
    pub use_delta_fetch: bool,
    /// Applied to network phases when the operation carries no timeout.
    pub default_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn new(app_key: impl Into<String>) -> Result<Self> {
        let app_key = app_key.into();
        if app_key.is_empty() {
            return Err(TideStoreError::InvalidArgument(
                "app_key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            app_key,
            entity_namespace: DEFAULT_ENTITY_NAMESPACE.to_string(),
            sync_collection: DEFAULT_SYNC_COLLECTION.to_string(),
            push_concurrency: DEFAULT_PUSH_CONCURRENCY,
            use_delta_fetch: true,
            default_timeout: None,
        })
    }

    /// Pathname a collection is rooted at: `/{namespace}/{appKey}/{collection}`.
    pub fn collection_path(&self, collection: &str) -> String {
        format!(
            "/{}/{}/{}",
            self.entity_namespace, self.app_key, collection
        )
    }

    /// Pathname of the reserved collection holding ledger records.
    pub fn ledger_path(&self) -> String {
        self.collection_path(&self.sync_collection)
    }
}
