//! The pull engine and the composite sync operation.
//!
//! Pulling aligns the local replica to a remote snapshot: entities present
//! locally but absent from the fetch are deleted (they were removed
//! upstream), everything fetched is upserted. A pull refuses to run while
//! mutations are pending — local changes push first, always.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{NetworkError, Result, SyncError};
use crate::network::RequestOptions;
use crate::query::Query;
use crate::storage::GetOptions;
use crate::types::{entity_id, entity_lmt, OperationOptions};

use super::delta;
use super::types::SyncOutcome;
use super::SyncEngine;

impl SyncEngine {
    /// Fail with `PendingSync` unless the ledger is empty, pushing once to
    /// try to drain it first.
    pub(crate) async fn ensure_ledger_drained(&self, options: &OperationOptions) -> Result<()> {
        let pending = self.ledger().count(self.collection(), None).await?;
        if pending == 0 {
            return Ok(());
        }
        self.push(None, options).await?;
        let pending = self.ledger().count(self.collection(), None).await?;
        if pending > 0 {
            return Err(SyncError::PendingSync { pending }.into());
        }
        Ok(())
    }

    /// The network phase of `find`: fetch the remote state (delta or full),
    /// delete local entities missing upstream, upsert the rest.
    ///
    /// `snapshot` is the cache result the caller already served; its ids
    /// feed the set-difference and its maximum `lmt` is the delta watermark.
    pub(crate) async fn fetch_and_reconcile(
        &self,
        query: &Query,
        snapshot: Vec<Value>,
        options: &OperationOptions,
    ) -> Result<Vec<Value>> {
        self.ensure_ledger_drained(options).await?;

        let path = self.entity_path();
        let request: RequestOptions = options.into();
        let use_delta = options
            .use_delta_fetch
            .unwrap_or(self.config().use_delta_fetch);

        let fetched = if use_delta {
            delta::fetch(&**self.gateway(), &path, query, &snapshot, &request).await?
        } else {
            self.gateway().find(&path, query, &request).await?
        };

        // Entities we hold that the remote no longer returns were deleted
        // upstream; drop them before surfacing the network value.
        let fetched_ids: HashSet<&str> = fetched.iter().filter_map(entity_id).collect();
        let removed: Vec<String> = snapshot
            .iter()
            .filter_map(entity_id)
            .filter(|id| !fetched_ids.contains(id))
            .map(|id| id.to_string())
            .collect();
        if !removed.is_empty() {
            tracing::debug!(
                collection = %self.collection(),
                removed = removed.len(),
                "reconciling upstream deletions"
            );
            self.store().delete(&path, &Query::ids_in(removed)).await?;
        }

        for entity in &fetched {
            self.store().put(&path, entity.clone()).await?;
        }
        Ok(fetched)
    }

    /// The network phase of `find_by_id`. A remote `NotFound` deletes the
    /// local copy before re-raising, so the replica converges on the
    /// upstream deletion.
    pub(crate) async fn fetch_by_id_and_reconcile(
        &self,
        id: &str,
        options: &OperationOptions,
    ) -> Result<Value> {
        self.ensure_ledger_drained(options).await?;

        let path = self.entity_path();
        let request: RequestOptions = options.into();
        let use_delta = options
            .use_delta_fetch
            .unwrap_or(self.config().use_delta_fetch);

        // The conditional path only applies when the cached copy carries a
        // watermark; an empty response then means "unchanged", not "gone".
        if use_delta {
            let cached = self
                .store()
                .get_by_id(&path, id, &GetOptions::default())
                .await;
            if let Ok(cached) = cached {
                if let Some(watermark) = entity_lmt(&cached).map(|s| s.to_string()) {
                    let changed = self
                        .gateway()
                        .find_changed_since(&path, &Query::ids_in([id]), &watermark, &request)
                        .await?;
                    return match changed.into_iter().next() {
                        None => Ok(cached),
                        Some(fresh) => {
                            self.store().put(&path, fresh.clone()).await?;
                            Ok(fresh)
                        }
                    };
                }
            }
        }

        match self.gateway().find_by_id(&path, id, &request).await {
            Ok(entity) => {
                self.store().put(&path, entity.clone()).await?;
                Ok(entity)
            }
            Err(NetworkError::NotFound) => {
                self.store().delete_by_id(&path, id).await?;
                Err(NetworkError::NotFound.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch remote state into the local replica.
    ///
    /// Unlike `find`'s network phase, a pull never pushes on the caller's
    /// behalf: pending mutations fail it with `PendingSync` before any
    /// network call is made.
    pub async fn pull(&self, query: &Query, options: &OperationOptions) -> Result<Vec<Value>> {
        let pending = self.ledger().count(self.collection(), None).await?;
        if pending > 0 {
            return Err(SyncError::PendingSync { pending }.into());
        }

        let snapshot = self
            .store()
            .get(
                &self.entity_path(),
                query,
                &GetOptions {
                    ttl: options.ttl,
                },
            )
            .await?;
        self.fetch_and_reconcile(query, snapshot, options).await
    }

    /// Push, then pull. A hard push failure skips the pull; entries the
    /// push classifier retained surface as `PendingSync` from the pull.
    pub async fn sync(&self, query: &Query, options: &OperationOptions) -> Result<SyncOutcome> {
        let push = self.push(None, options).await?;
        let pull = self.pull(query, options).await?;
        Ok(SyncOutcome { push, pull })
    }
}
