//! The cache store facade.
//!
//! Every operation answers twice: immediately from the local replica, and
//! later from the network once the remote state has been fetched and
//! reconciled (or the pending mutations pushed). The two outcomes are
//! independent — a failing network phase never invalidates the cache value
//! already returned, so callers can serve stale-but-available data while
//! surfacing the sync error separately.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::aggregation::Aggregation;
use crate::config::StoreConfig;
use crate::error::{NetworkError, Result, TideStoreError};
use crate::network::NetworkGateway;
use crate::query::Query;
use crate::storage::{EntityStore, GetOptions};
use crate::sync::{LedgerRecord, LockRegistry, PushResult, SyncEngine, SyncOutcome};
use crate::types::{
    entity_id, entity_lmt, mark_local, set_entity_id, temp_id, OperationOptions,
};

// ============================================================================
// DualPhase
// ============================================================================

/// The two observable outcomes of a cache store operation: the immediate
/// cache value and a deferred network value.
///
/// The network phase runs on a spawned task, so it makes progress whether or
/// not the caller awaits it; [`into_cache`] keeps the cache value and leaves
/// the phase running detached.
///
/// [`into_cache`]: DualPhase::into_cache
#[derive(Debug)]
pub struct DualPhase<T> {
    cache: T,
    network: JoinHandle<Result<T>>,
}

impl<T> DualPhase<T> {
    fn new(cache: T, network: JoinHandle<Result<T>>) -> Self {
        Self { cache, network }
    }

    /// The value served from the local replica.
    pub fn cache(&self) -> &T {
        &self.cache
    }

    /// Consume the handle, keeping only the cache value. The network phase
    /// keeps running in the background.
    pub fn into_cache(self) -> T {
        self.cache
    }

    /// Await the network phase.
    pub async fn network(self) -> Result<T> {
        match self.network.await {
            Ok(result) => result,
            Err(e) => Err(TideStoreError::Internal(format!(
                "network phase task failed: {e}"
            ))),
        }
    }

    /// Await the network phase, keeping the cache value too.
    pub async fn settle(self) -> (T, Result<T>) {
        let network = match self.network.await {
            Ok(result) => result,
            Err(e) => Err(TideStoreError::Internal(format!(
                "network phase task failed: {e}"
            ))),
        };
        (self.cache, network)
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match limit {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Timeout.into()),
        },
    }
}

// ============================================================================
// CacheStore
// ============================================================================

/// Offline-first view of one named remote collection.
///
/// Reads and writes hit the local replica first; writes also enqueue a
/// pending mutation and kick off a push restricted to the affected ids.
/// Instances are cheap to clone-share via `Arc`; instances for the same
/// collection must share the [`LockRegistry`] so ledger writers serialize.
pub struct CacheStore {
    engine: Arc<SyncEngine>,
}

impl CacheStore {
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn EntityStore>,
        gateway: Arc<dyn NetworkGateway>,
        config: Arc<StoreConfig>,
        locks: Arc<LockRegistry>,
    ) -> Result<Self> {
        let engine = SyncEngine::new(collection, store, gateway, config, locks)?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }

    pub fn collection(&self) -> &str {
        self.engine.collection()
    }

    fn effective_timeout(&self, options: &OperationOptions) -> Option<Duration> {
        options.timeout.or(self.engine.config().default_timeout)
    }

    fn read_options(options: &OperationOptions) -> GetOptions {
        GetOptions { ttl: options.ttl }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Execute `query` against the local replica, then fetch and reconcile
    /// the remote state. The network value is the fetched set.
    pub async fn find(
        &self,
        query: &Query,
        options: &OperationOptions,
    ) -> Result<DualPhase<Vec<Value>>> {
        query.validate()?;
        let snapshot = self
            .engine
            .store()
            .get(&self.engine.entity_path(), query, &Self::read_options(options))
            .await?;

        let engine = Arc::clone(&self.engine);
        let query = query.clone();
        let options = options.clone();
        let limit = self.effective_timeout(&options);
        let network_snapshot = snapshot.clone();
        let handle = tokio::spawn(async move {
            with_timeout(
                limit,
                engine.fetch_and_reconcile(&query, network_snapshot, &options),
            )
            .await
        });
        Ok(DualPhase::new(snapshot, handle))
    }

    /// Dual-phase read of a single id. The cache value is `None` when the
    /// replica has no copy; a remote `NotFound` deletes the local copy and
    /// fails the network phase.
    pub async fn find_by_id(
        &self,
        id: &str,
        options: &OperationOptions,
    ) -> Result<DualPhase<Option<Value>>> {
        let cached = match self
            .engine
            .store()
            .get_by_id(&self.engine.entity_path(), id, &Self::read_options(options))
            .await
        {
            Ok(entity) => Some(entity),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        let engine = Arc::clone(&self.engine);
        let id = id.to_string();
        let options = options.clone();
        let limit = self.effective_timeout(&options);
        let handle = tokio::spawn(async move {
            with_timeout(limit, async {
                let entity = engine.fetch_by_id_and_reconcile(&id, &options).await?;
                Ok(Some(entity))
            })
            .await
        });
        Ok(DualPhase::new(cached, handle))
    }

    /// Local aggregation as the cache value; the network phase is gated on
    /// an empty ledger and delegates to the backend's `_group`.
    pub async fn group(
        &self,
        aggregation: &Aggregation,
        options: &OperationOptions,
    ) -> Result<DualPhase<Vec<Value>>> {
        aggregation.validate()?;
        let entities = self
            .engine
            .store()
            .get(
                &self.engine.entity_path(),
                &Query::empty(),
                &Self::read_options(options),
            )
            .await?;
        let local = aggregation.process(&entities)?;

        let engine = Arc::clone(&self.engine);
        let aggregation = aggregation.clone();
        let options = options.clone();
        let limit = self.effective_timeout(&options);
        let handle = tokio::spawn(async move {
            with_timeout(limit, async {
                engine.ensure_ledger_drained(&options).await?;
                let rows = engine
                    .gateway()
                    .group(&engine.entity_path(), &aggregation, &(&options).into())
                    .await?;
                Ok(rows)
            })
            .await
        });
        Ok(DualPhase::new(local, handle))
    }

    /// Local count as the cache value; the network phase is gated on an
    /// empty ledger and delegates to the backend's `_count`.
    pub async fn count(
        &self,
        query: &Query,
        options: &OperationOptions,
    ) -> Result<DualPhase<usize>> {
        query.validate()?;
        let local = self
            .engine
            .store()
            .count(&self.engine.entity_path(), query)
            .await?;

        let engine = Arc::clone(&self.engine);
        let query = query.clone();
        let options = options.clone();
        let limit = self.effective_timeout(&options);
        let handle = tokio::spawn(async move {
            with_timeout(limit, async {
                engine.ensure_ledger_drained(&options).await?;
                let n = engine
                    .gateway()
                    .count(&engine.entity_path(), &query, &(&options).into())
                    .await?;
                Ok(n)
            })
            .await
        });
        Ok(DualPhase::new(local, handle))
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store an entity locally and enqueue it for push. An entity without an
    /// id is an offline create: it gets a temp id and the `local` mark until
    /// the backend assigns the canonical id.
    ///
    /// The cache value is the locally-stored entity; the network value is
    /// the backend's stored shape once the restricted push reconciles it.
    pub async fn save(
        &self,
        mut entity: Value,
        options: &OperationOptions,
    ) -> Result<DualPhase<Value>> {
        if !entity.is_object() {
            return Err(TideStoreError::InvalidArgument(
                "entity must be a JSON object".to_string(),
            ));
        }
        let id = match entity_id(&entity) {
            Some(id) => id.to_string(),
            None => {
                let id = temp_id();
                set_entity_id(&mut entity, &id);
                mark_local(&mut entity);
                id
            }
        };

        // Store mutation happens-before ledger append happens-before push
        // kickoff. A failed append after a successful put is not rolled
        // back: local durability wins, and the next sync reconciles.
        let stored = self
            .engine
            .store()
            .put(&self.engine.entity_path(), entity)
            .await?;
        let lmt = entity_lmt(&stored).map(|s| s.to_string());
        self.engine.enqueue(&[(id.clone(), lmt)]).await?;

        let engine = Arc::clone(&self.engine);
        let options = options.clone();
        let limit = self.effective_timeout(&options);
        let fallback = stored.clone();
        let handle = tokio::spawn(async move {
            with_timeout(limit, async {
                let result = engine.push(Some(std::slice::from_ref(&id)), &options).await?;
                if let Some(entry) = result.error.into_iter().find(|e| e.id == id) {
                    return Err(entry.error.into());
                }
                match result.success.into_iter().find(|s| s.id == id) {
                    Some(success) => Ok(success.entity.unwrap_or(fallback)),
                    // Another operation already reconciled this id.
                    None => Ok(fallback),
                }
            })
            .await
        });
        Ok(DualPhase::new(stored, handle))
    }

    /// Delete matching entities locally and enqueue the deletions. The cache
    /// value is the local removal count; the network value is how many of
    /// those deletions the restricted push propagated.
    pub async fn remove(
        &self,
        query: &Query,
        options: &OperationOptions,
    ) -> Result<DualPhase<usize>> {
        query.validate()?;
        let path = self.engine.entity_path();
        let matched = self
            .engine
            .store()
            .get(&path, query, &GetOptions::default())
            .await?;
        let entries: Vec<(String, Option<String>)> = matched
            .iter()
            .filter_map(|e| {
                entity_id(e).map(|id| (id.to_string(), entity_lmt(e).map(|s| s.to_string())))
            })
            .collect();

        let removed = self.engine.store().delete(&path, query).await?;
        self.engine.enqueue(&entries).await?;

        let ids: Vec<String> = entries.into_iter().map(|(id, _)| id).collect();
        let handle = self.spawn_removal_push(ids, options);
        Ok(DualPhase::new(removed, handle))
    }

    /// Delete one entity locally by id and enqueue the deletion. A missing
    /// entity yields count 0 and touches neither the ledger nor the network.
    pub async fn remove_by_id(
        &self,
        id: &str,
        options: &OperationOptions,
    ) -> Result<DualPhase<usize>> {
        let path = self.engine.entity_path();
        let lmt = match self
            .engine
            .store()
            .get_by_id(&path, id, &GetOptions::default())
            .await
        {
            Ok(entity) => entity_lmt(&entity).map(|s| s.to_string()),
            Err(e) if e.is_not_found() => {
                let handle = tokio::spawn(async { Ok::<usize, TideStoreError>(0) });
                return Ok(DualPhase::new(0, handle));
            }
            Err(e) => return Err(e.into()),
        };

        let removed = self.engine.store().delete_by_id(&path, id).await?;
        self.engine.enqueue(&[(id.to_string(), lmt)]).await?;

        let handle = self.spawn_removal_push(vec![id.to_string()], options);
        Ok(DualPhase::new(removed, handle))
    }

    fn spawn_removal_push(
        &self,
        ids: Vec<String>,
        options: &OperationOptions,
    ) -> JoinHandle<Result<usize>> {
        let engine = Arc::clone(&self.engine);
        let options = options.clone();
        let limit = self.effective_timeout(&options);
        tokio::spawn(async move {
            with_timeout(limit, async {
                if ids.is_empty() {
                    return Ok(0);
                }
                let result = engine.push(Some(ids.as_slice()), &options).await?;
                if let Some(entry) = result.error.into_iter().next() {
                    return Err(entry.error.into());
                }
                Ok(result.success.len())
            })
            .await
        })
    }

    // -----------------------------------------------------------------------
    // Sync surface
    // -----------------------------------------------------------------------

    /// Drain this collection's pending mutations to the backend.
    pub async fn push(&self, options: &OperationOptions) -> Result<PushResult> {
        with_timeout(
            self.effective_timeout(options),
            self.engine.push(None, options),
        )
        .await
    }

    /// Fetch remote state into the local replica. Fails with `PendingSync`
    /// when mutations are pending; push first.
    pub async fn pull(&self, query: &Query, options: &OperationOptions) -> Result<Vec<Value>> {
        query.validate()?;
        with_timeout(
            self.effective_timeout(options),
            self.engine.pull(query, options),
        )
        .await
    }

    /// Push, then pull.
    pub async fn sync(&self, query: &Query, options: &OperationOptions) -> Result<SyncOutcome> {
        query.validate()?;
        with_timeout(
            self.effective_timeout(options),
            self.engine.sync(query, options),
        )
        .await
    }

    /// Number of pending mutations, optionally restricted to the ids named
    /// by an "ids ∈ {…}" query.
    pub async fn pending_sync_count(&self, query: Option<&Query>) -> Result<usize> {
        let ids = match query {
            None => None,
            Some(q) => q.restricted_ids(),
        };
        Ok(self
            .engine
            .ledger()
            .count(self.collection(), ids.as_deref())
            .await?)
    }

    /// The pending-mutation record: entity ids and their enqueue-time
    /// timestamps. A collection with nothing pending yields an empty record.
    pub async fn pending_sync_entities(&self) -> Result<LedgerRecord> {
        match self.engine.ledger().read(self.collection()).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => Ok(LedgerRecord::new(self.collection())),
            Err(e) => Err(e.into()),
        }
    }

    /// Abandon pending mutations without pushing them. `None` clears all.
    /// Returns how many entries were dropped.
    pub async fn clear_sync(&self, ids: Option<&[String]>) -> Result<usize> {
        self.engine.clear_pending(ids).await
    }

    /// Purely local wipe: delete matching entities from the replica and drop
    /// their pending entries. Never touches the network.
    pub async fn clear(&self, query: Option<&Query>) -> Result<usize> {
        let path = self.engine.entity_path();
        match query {
            None => {
                let removed = self.engine.store().delete(&path, &Query::empty()).await?;
                self.engine.clear_pending(None).await?;
                Ok(removed)
            }
            Some(query) => {
                query.validate()?;
                let matched = self
                    .engine
                    .store()
                    .get(&path, query, &GetOptions::default())
                    .await?;
                let ids: Vec<String> = matched
                    .iter()
                    .filter_map(|e| entity_id(e).map(|id| id.to_string()))
                    .collect();
                let removed = self.engine.store().delete(&path, query).await?;
                self.engine.clear_pending(Some(ids.as_slice())).await?;
                Ok(removed)
            }
        }
    }
}
