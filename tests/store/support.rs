//! Shared test support: a mock network gateway with recorded calls and
//! pluggable per-method responses, plus a harness wiring it to a memory
//! store behind a cache store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tidestore::aggregation::Aggregation;
use tidestore::config::StoreConfig;
use tidestore::error::NetworkError;
use tidestore::network::{NetworkGateway, RequestOptions};
use tidestore::query::Query;
use tidestore::storage::MemoryStore;
use tidestore::store::CacheStore;
use tidestore::sync::LockRegistry;

// ============================================================================
// Mock gateway
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
#[allow(dead_code)]
pub enum GatewayCall {
    Find { path: String },
    FindById { path: String, id: String },
    ChangedSince { path: String, since: String },
    Create { path: String, body: Value },
    Update { path: String, id: String },
    Remove { path: String },
    RemoveById { path: String, id: String },
    Count { path: String },
    Group { path: String },
}

type FindHandler = Box<dyn Fn(&str, &Query) -> Result<Vec<Value>, NetworkError> + Send + Sync>;
type FindByIdHandler = Box<dyn Fn(&str, &str) -> Result<Value, NetworkError> + Send + Sync>;
type ChangedSinceHandler =
    Box<dyn Fn(&str, &Query, &str) -> Result<Vec<Value>, NetworkError> + Send + Sync>;
type CreateHandler = Box<dyn Fn(&str, &Value) -> Result<Value, NetworkError> + Send + Sync>;
type UpdateHandler = Box<dyn Fn(&str, &str, &Value) -> Result<Value, NetworkError> + Send + Sync>;
type RemoveHandler = Box<dyn Fn(&str, &Query) -> Result<usize, NetworkError> + Send + Sync>;
type RemoveByIdHandler = Box<dyn Fn(&str, &str) -> Result<usize, NetworkError> + Send + Sync>;
type CountHandler = Box<dyn Fn(&str, &Query) -> Result<usize, NetworkError> + Send + Sync>;
type GroupHandler =
    Box<dyn Fn(&str, &Aggregation) -> Result<Vec<Value>, NetworkError> + Send + Sync>;

#[derive(Default)]
struct MockGatewayInner {
    calls: Vec<GatewayCall>,
    offline: bool,
    find: Option<FindHandler>,
    find_by_id: Option<FindByIdHandler>,
    changed_since: Option<ChangedSinceHandler>,
    create: Option<CreateHandler>,
    update: Option<UpdateHandler>,
    remove: Option<RemoveHandler>,
    remove_by_id: Option<RemoveByIdHandler>,
    count: Option<CountHandler>,
    group: Option<GroupHandler>,
}

#[derive(Default)]
pub struct MockGateway {
    inner: Mutex<MockGatewayInner>,
    created: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every request fail with a transport error, as if the device
    /// lost connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner.lock().calls.clone()
    }

    pub fn on_find(
        &self,
        f: impl Fn(&str, &Query) -> Result<Vec<Value>, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().find = Some(Box::new(f));
    }

    pub fn on_find_by_id(
        &self,
        f: impl Fn(&str, &str) -> Result<Value, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().find_by_id = Some(Box::new(f));
    }

    pub fn on_changed_since(
        &self,
        f: impl Fn(&str, &Query, &str) -> Result<Vec<Value>, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().changed_since = Some(Box::new(f));
    }

    pub fn on_create(
        &self,
        f: impl Fn(&str, &Value) -> Result<Value, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().create = Some(Box::new(f));
    }

    pub fn on_update(
        &self,
        f: impl Fn(&str, &str, &Value) -> Result<Value, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().update = Some(Box::new(f));
    }

    pub fn on_remove_by_id(
        &self,
        f: impl Fn(&str, &str) -> Result<usize, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().remove_by_id = Some(Box::new(f));
    }

    pub fn on_count(
        &self,
        f: impl Fn(&str, &Query) -> Result<usize, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().count = Some(Box::new(f));
    }

    pub fn on_group(
        &self,
        f: impl Fn(&str, &Aggregation) -> Result<Vec<Value>, NetworkError> + Send + Sync + 'static,
    ) {
        self.inner.lock().group = Some(Box::new(f));
    }

    fn check_offline(inner: &MockGatewayInner) -> Result<(), NetworkError> {
        if inner.offline {
            Err(NetworkError::Transport("network unreachable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NetworkGateway for MockGateway {
    async fn find(
        &self,
        path: &str,
        query: &Query,
        _options: &RequestOptions,
    ) -> Result<Vec<Value>, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::Find {
            path: path.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.find {
            Some(f) => f(path, query),
            None => Ok(Vec::new()),
        }
    }

    async fn find_by_id(
        &self,
        path: &str,
        id: &str,
        _options: &RequestOptions,
    ) -> Result<Value, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::FindById {
            path: path.to_string(),
            id: id.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.find_by_id {
            Some(f) => f(path, id),
            None => Err(NetworkError::NotFound),
        }
    }

    async fn find_changed_since(
        &self,
        path: &str,
        query: &Query,
        since: &str,
        _options: &RequestOptions,
    ) -> Result<Vec<Value>, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::ChangedSince {
            path: path.to_string(),
            since: since.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.changed_since {
            Some(f) => f(path, query, since),
            None => Ok(Vec::new()),
        }
    }

    async fn create(
        &self,
        path: &str,
        entity: &Value,
        _options: &RequestOptions,
    ) -> Result<Value, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::Create {
            path: path.to_string(),
            body: entity.clone(),
        });
        Self::check_offline(&inner)?;
        match &inner.create {
            Some(f) => f(path, entity),
            None => {
                // Default: assign a server id and a timestamp, like a real
                // backend would.
                let n = self.created.fetch_add(1, Ordering::SeqCst);
                let mut created = entity.clone();
                if let Some(obj) = created.as_object_mut() {
                    obj.insert("id".to_string(), json!(format!("srv{n}")));
                    obj.insert("_kmd".to_string(), json!({"lmt": "2024-06-01T00:00:00Z"}));
                }
                Ok(created)
            }
        }
    }

    async fn update(
        &self,
        path: &str,
        id: &str,
        entity: &Value,
        _options: &RequestOptions,
    ) -> Result<Value, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::Update {
            path: path.to_string(),
            id: id.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.update {
            Some(f) => f(path, id, entity),
            None => Ok(entity.clone()),
        }
    }

    async fn remove(
        &self,
        path: &str,
        query: &Query,
        _options: &RequestOptions,
    ) -> Result<usize, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::Remove {
            path: path.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.remove {
            Some(f) => f(path, query),
            None => Ok(0),
        }
    }

    async fn remove_by_id(
        &self,
        path: &str,
        id: &str,
        _options: &RequestOptions,
    ) -> Result<usize, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::RemoveById {
            path: path.to_string(),
            id: id.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.remove_by_id {
            Some(f) => f(path, id),
            None => Ok(1),
        }
    }

    async fn count(
        &self,
        path: &str,
        query: &Query,
        _options: &RequestOptions,
    ) -> Result<usize, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::Count {
            path: path.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.count {
            Some(f) => f(path, query),
            None => Ok(0),
        }
    }

    async fn group(
        &self,
        path: &str,
        aggregation: &Aggregation,
        _options: &RequestOptions,
    ) -> Result<Vec<Value>, NetworkError> {
        let mut inner = self.inner.lock();
        inner.calls.push(GatewayCall::Group {
            path: path.to_string(),
        });
        Self::check_offline(&inner)?;
        match &inner.group {
            Some(f) => f(path, aggregation),
            None => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub config: Arc<StoreConfig>,
    pub locks: Arc<LockRegistry>,
    pub cache: CacheStore,
}

impl Harness {
    /// Pathname the harness collection is rooted at.
    pub fn path(&self) -> String {
        self.config.collection_path(self.cache.collection())
    }

    /// A second cache store for the same collection, sharing this harness's
    /// store, gateway, config, and lock registry.
    pub fn sibling_store(&self) -> CacheStore {
        let entity_store: Arc<dyn tidestore::storage::EntityStore> = self.store.clone();
        let network: Arc<dyn NetworkGateway> = self.gateway.clone();
        CacheStore::new(
            self.cache.collection(),
            entity_store,
            network,
            self.config.clone(),
            self.locks.clone(),
        )
        .unwrap()
    }

    /// Seed an entity directly into the local replica, bypassing the ledger.
    pub async fn seed(&self, entity: Value) {
        use tidestore::storage::EntityStore;
        self.store.put(&self.path(), entity).await.unwrap();
    }

    /// Read the local replica directly.
    pub async fn local(&self, id: &str) -> Option<Value> {
        use tidestore::storage::{EntityStore, GetOptions};
        self.store
            .get_by_id(&self.path(), id, &GetOptions::default())
            .await
            .ok()
    }
}

pub fn harness(collection: &str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(MockGateway::new());
    let config = Arc::new(StoreConfig::new("kid_test").unwrap());
    let locks = Arc::new(LockRegistry::new());
    let entity_store: Arc<dyn tidestore::storage::EntityStore> = store.clone();
    let network: Arc<dyn NetworkGateway> = gateway.clone();
    let cache = CacheStore::new(
        collection,
        entity_store,
        network,
        config.clone(),
        locks.clone(),
    )
    .unwrap();
    Harness {
        store,
        gateway,
        config,
        locks,
        cache,
    }
}
