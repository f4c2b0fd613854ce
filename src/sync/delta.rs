//! Delta fetch: a conditional remote query returning only entities whose
//! last-modified timestamp exceeds a watermark.
//!
//! The watermark is the maximum `lmt` observed in the local cache snapshot
//! for the query. The fetched set handed back to the reconciler is the
//! snapshot merged with the changed entities, so the set-difference deletion
//! step removes nothing in delta mode — a delta miss degrades to staleness,
//! never to corruption. With no watermark available the fetch is full.

use std::collections::HashMap;

use chrono::DateTime;
use serde_json::Value;

use crate::error::NetworkError;
use crate::network::{NetworkGateway, RequestOptions};
use crate::query::Query;
use crate::types::{entity_id, entity_lmt};

/// Order two RFC 3339 timestamps, falling back to lexicographic comparison
/// when either fails to parse.
fn lmt_ordering(a: &str, b: &str) -> std::cmp::Ordering {
    match (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        (Ok(ta), Ok(tb)) => ta.cmp(&tb),
        _ => a.cmp(b),
    }
}

/// The delta watermark: maximum `lmt` carried by any entity in the snapshot.
pub fn max_lmt(entities: &[Value]) -> Option<String> {
    let mut best: Option<&str> = None;
    for entity in entities {
        let Some(lmt) = entity_lmt(entity) else {
            continue;
        };
        best = match best {
            None => Some(lmt),
            Some(b) if lmt_ordering(lmt, b) == std::cmp::Ordering::Greater => Some(lmt),
            Some(b) => Some(b),
        };
    }
    best.map(|s| s.to_string())
}

/// Merge changed entities over a snapshot by id: snapshot order first with
/// changed bodies substituted, then entities new to the snapshot.
pub fn merge_over_snapshot(snapshot: &[Value], changed: Vec<Value>) -> Vec<Value> {
    let mut changed_by_id: HashMap<String, Value> = HashMap::new();
    let mut unidentified: Vec<Value> = Vec::new();
    for entity in changed {
        match entity_id(&entity) {
            Some(id) => {
                changed_by_id.insert(id.to_string(), entity);
            }
            None => unidentified.push(entity),
        }
    }

    let mut merged = Vec::with_capacity(snapshot.len() + changed_by_id.len());
    for entity in snapshot {
        match entity_id(entity).and_then(|id| changed_by_id.remove(id)) {
            Some(fresh) => merged.push(fresh),
            None => merged.push(entity.clone()),
        }
    }
    let mut new_entities: Vec<(String, Value)> = changed_by_id.into_iter().collect();
    new_entities.sort_by(|a, b| a.0.cmp(&b.0));
    merged.extend(new_entities.into_iter().map(|(_, e)| e));
    merged.extend(unidentified);
    merged
}

/// Fetch the remote state for `query`, by delta when the snapshot carries a
/// watermark, else fully.
pub async fn fetch(
    gateway: &dyn NetworkGateway,
    path: &str,
    query: &Query,
    snapshot: &[Value],
    options: &RequestOptions,
) -> Result<Vec<Value>, NetworkError> {
    match max_lmt(snapshot) {
        None => gateway.find(path, query, options).await,
        Some(watermark) => {
            let changed = gateway
                .find_changed_since(path, query, &watermark, options)
                .await?;
            Ok(merge_over_snapshot(snapshot, changed))
        }
    }
}
