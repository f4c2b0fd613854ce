//! Entity shape helpers and per-operation options.
//!
//! Entities are plain `serde_json::Value` objects with a required string
//! `id` field and an optional `_kmd` metadata envelope carrying the
//! server-assigned last-modified timestamp (`lmt`) and the `local` flag for
//! entities created offline under a client-minted temp id.

use std::time::Duration;

use serde_json::{Map, Value};

/// Field holding the entity identifier.
pub const ID_FIELD: &str = "id";

/// Field holding the metadata envelope.
pub const METADATA_FIELD: &str = "_kmd";

/// Metadata key for the last-modified timestamp (RFC 3339).
pub const LMT_FIELD: &str = "lmt";

/// Metadata key marking entities created offline.
pub const LOCAL_FIELD: &str = "local";

/// Prefix of client-minted temp ids.
pub const TEMP_ID_PREFIX: &str = "temp_";

// ============================================================================
// Entity helpers
// ============================================================================

/// Read the entity id, if present and a string.
pub fn entity_id(entity: &Value) -> Option<&str> {
    entity.get(ID_FIELD).and_then(Value::as_str)
}

/// Set the entity id, turning `entity` into an object if it is not one.
pub fn set_entity_id(entity: &mut Value, id: &str) {
    if let Some(obj) = entity.as_object_mut() {
        obj.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    }
}

/// Read the last-modified timestamp from the metadata envelope.
pub fn entity_lmt(entity: &Value) -> Option<&str> {
    entity
        .get(METADATA_FIELD)
        .and_then(|m| m.get(LMT_FIELD))
        .and_then(Value::as_str)
}

/// True when the metadata envelope marks this entity as created offline.
pub fn is_local(entity: &Value) -> bool {
    entity
        .get(METADATA_FIELD)
        .and_then(|m| m.get(LOCAL_FIELD))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// True for ids minted by [`temp_id`].
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Mint a temp id for an entity created offline.
pub fn temp_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4())
}

/// Mark an entity as created offline (`_kmd.local = true`).
pub fn mark_local(entity: &mut Value) {
    let Some(obj) = entity.as_object_mut() else {
        return;
    };
    let meta = obj
        .entry(METADATA_FIELD.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        meta.insert(LOCAL_FIELD.to_string(), Value::Bool(true));
    }
}

/// Clone an entity without its id and metadata envelope — the body shape a
/// create request carries, letting the backend assign the canonical id.
pub fn strip_for_create(entity: &Value) -> Value {
    match entity.as_object() {
        Some(obj) => {
            let mut body = obj.clone();
            body.remove(ID_FIELD);
            body.remove(METADATA_FIELD);
            Value::Object(body)
        }
        None => entity.clone(),
    }
}

/// Current time as an RFC 3339 string.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// OperationOptions
// ============================================================================

/// Options recognized by every cache store operation.
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    /// Abort the in-flight network or storage call after this long. Partial
    /// work already committed is not reverted.
    pub timeout: Option<Duration>,
    /// Use delta fetch for find/find_by_id. Defaults from `StoreConfig`.
    pub use_delta_fetch: Option<bool>,
    /// Opaque per-request metadata forwarded to the gateway.
    pub properties: Option<Value>,
    /// Advisory freshness hint forwarded to the entity store.
    pub ttl: Option<Duration>,
}

impl OperationOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
