//! The push engine: drain a collection's pending-mutation ledger to the
//! backend.
//!
//! Intent is inferred per id, not recorded: an entity present in the store
//! with the `local` flag is created remotely, present without it is updated,
//! absent is deleted. Per-id requests run concurrently under a semaphore;
//! the ledger snapshot is mutated only on the coordinating task after each
//! join, then persisted once.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{NetworkError, Result, StorageError};
use crate::network::{NetworkGateway, RequestOptions};
use crate::storage::{EntityStore, GetOptions};
use crate::types::{entity_id, is_local, strip_for_create, OperationOptions};

use super::types::{PushError, PushResult, PushSuccess, SyncFailure};
use super::SyncEngine;

/// What happened to one pending entity, and what it means for its ledger
/// entry.
enum Settled {
    /// Reconciled — drop the entry. Creates and updates carry the backend's
    /// stored entity.
    Done(Option<Value>),
    /// The client cannot make progress on this entry — drop it, surface the
    /// failure.
    GaveUp(SyncFailure),
    /// Transient or unresolved — keep the entry for a later push, surface
    /// the failure.
    Retry(SyncFailure),
}

impl SyncEngine {
    /// Drain pending mutations, optionally restricted to `ids`.
    ///
    /// A missing ledger record resolves to an empty result. A storage
    /// failure while classifying pending ids aborts the whole push; per-id
    /// network failures are classified and collected instead.
    pub async fn push(
        &self,
        ids: Option<&[String]>,
        options: &OperationOptions,
    ) -> Result<PushResult> {
        let _guard = self.acquire_collection_lock().await;
        self.push_locked(ids, options).await
    }

    pub(crate) async fn push_locked(
        &self,
        ids: Option<&[String]>,
        options: &OperationOptions,
    ) -> Result<PushResult> {
        let collection = self.collection().to_string();
        let mut result = PushResult::new(&collection);

        // Snapshot the ledger.
        let mut record = match self.ledger().read(&collection).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return Ok(result),
            Err(e) => return Err(e.into()),
        };

        let target_ids: Vec<String> = match ids {
            None => record.ids(),
            Some(ids) => ids
                .iter()
                .filter(|id| record.contains(id))
                .cloned()
                .collect(),
        };
        if target_ids.is_empty() {
            return Ok(result);
        }

        // Classify each id by entity-store presence.
        let entity_path = self.entity_path();
        let mut saves: Vec<Value> = Vec::new();
        let mut deletes: Vec<String> = Vec::new();
        for id in &target_ids {
            match self
                .store()
                .get_by_id(&entity_path, id, &GetOptions::default())
                .await
            {
                Ok(entity) => saves.push(entity),
                Err(e) if e.is_not_found() => deletes.push(id.clone()),
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            collection = %collection,
            saves = saves.len(),
            deletes = deletes.len(),
            "pushing pending entities"
        );

        // Execute with bounded fan-out.
        let request: RequestOptions = options.into();
        let semaphore = Arc::new(Semaphore::new(self.config().push_concurrency.max(1)));
        let mut join_set: JoinSet<(String, Settled)> = JoinSet::new();

        for entity in saves {
            let id = match entity_id(&entity) {
                Some(id) => id.to_string(),
                None => {
                    return Err(StorageError::MissingId {
                        collection: entity_path.clone(),
                    }
                    .into())
                }
            };
            let store = Arc::clone(self.store());
            let gateway = Arc::clone(self.gateway());
            let path = entity_path.clone();
            let request = request.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            id,
                            Settled::Retry(SyncFailure::Storage(
                                "push semaphore closed unexpectedly".to_string(),
                            )),
                        );
                    }
                };
                let settled = push_save(&*store, &*gateway, &path, &id, entity, &request).await;
                (id, settled)
            });
        }

        for id in deletes {
            let gateway = Arc::clone(self.gateway());
            let path = entity_path.clone();
            let request = request.clone();
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            id,
                            Settled::Retry(SyncFailure::Storage(
                                "push semaphore closed unexpectedly".to_string(),
                            )),
                        );
                    }
                };
                let settled = push_delete(&*gateway, &path, &id, &request).await;
                (id, settled)
            });
        }

        // Apply outcomes to the snapshot; only this task mutates it.
        while let Some(joined) = join_set.join_next().await {
            let (id, settled) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    // The entry stays pending; a later push retries it.
                    tracing::warn!(collection = %collection, "push task failed: {e}");
                    continue;
                }
            };
            match settled {
                Settled::Done(entity) => {
                    record.remove(&id);
                    result.success.push(PushSuccess { id, entity });
                }
                Settled::GaveUp(error) => {
                    tracing::warn!(
                        collection = %collection,
                        id = %id,
                        "dropping pending entry: {error}"
                    );
                    record.remove(&id);
                    result.error.push(PushError { id, error });
                }
                Settled::Retry(error) => {
                    result.error.push(PushError { id, error });
                }
            }
        }

        // Persist the trimmed snapshot.
        self.ledger().write(&collection, &record).await?;
        Ok(result)
    }
}

/// Reconcile one entity present in the store: create remotely when it was
/// made offline, update otherwise.
async fn push_save(
    store: &dyn EntityStore,
    gateway: &dyn NetworkGateway,
    path: &str,
    id: &str,
    entity: Value,
    request: &RequestOptions,
) -> Settled {
    if is_local(&entity) {
        // Offline create: the backend assigns the canonical id, then the
        // temp-id row is retired locally.
        let body = strip_for_create(&entity);
        let created = match gateway.create(path, &body, request).await {
            Ok(created) => created,
            Err(NetworkError::InsufficientCredentials) => {
                return Settled::GaveUp(SyncFailure::Network(
                    NetworkError::InsufficientCredentials,
                ))
            }
            Err(e) => return Settled::Retry(SyncFailure::Network(e)),
        };
        if let Err(e) = store.put(path, created.clone()).await {
            return Settled::Retry(SyncFailure::Storage(e.to_string()));
        }
        match store.delete_by_id(path, id).await {
            Ok(1) => Settled::Done(Some(created)),
            // The create is committed upstream; the entry stays pending and
            // the next push re-classifies the temp id as a delete, which
            // converges through the backend's NotFound.
            Ok(actual) => Settled::Retry(SyncFailure::CountMismatch {
                expected: 1,
                actual,
            }),
            Err(e) => Settled::Retry(SyncFailure::Storage(e.to_string())),
        }
    } else {
        match gateway.update(path, id, &entity, request).await {
            Ok(updated) => Settled::Done(Some(updated)),
            Err(NetworkError::InsufficientCredentials) => Settled::GaveUp(SyncFailure::Network(
                NetworkError::InsufficientCredentials,
            )),
            Err(e) => Settled::Retry(SyncFailure::Network(e)),
        }
    }
}

/// Reconcile one entity absent from the store: delete remotely.
async fn push_delete(
    gateway: &dyn NetworkGateway,
    path: &str,
    id: &str,
    request: &RequestOptions,
) -> Settled {
    match gateway.remove_by_id(path, id, request).await {
        Ok(1) => Settled::Done(None),
        Ok(actual) => Settled::Retry(SyncFailure::CountMismatch {
            expected: 1,
            actual,
        }),
        // Already gone upstream.
        Err(NetworkError::NotFound) => Settled::Done(None),
        Err(NetworkError::InsufficientCredentials) => Settled::GaveUp(SyncFailure::Network(
            NetworkError::InsufficientCredentials,
        )),
        Err(e) => Settled::Retry(SyncFailure::Network(e)),
    }
}
