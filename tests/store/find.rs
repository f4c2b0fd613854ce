//! Dual-phase find/find_by_id/count/group behavior: cache values served
//! immediately, network values fetched and reconciled in the background.

use serde_json::json;

use tidestore::error::TideStoreError;
use tidestore::query::Query;
use tidestore::types::OperationOptions;

use super::support::{harness, GatewayCall};

fn no_delta() -> OperationOptions {
    OperationOptions {
        use_delta_fetch: Some(false),
        ..OperationOptions::default()
    }
}

#[tokio::test]
async fn find_serves_cache_then_upserts_fetched_entities() {
    let h = harness("books");
    h.seed(json!({"id": "a", "title": "local"})).await;
    h.gateway.on_find(|_, _| {
        Ok(vec![
            json!({"id": "a", "title": "remote"}),
            json!({"id": "b", "title": "new"}),
        ])
    });

    let dual = h
        .cache
        .find(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(dual.cache().len(), 1);
    assert_eq!(dual.cache()[0]["title"], "local");

    let fetched = dual.network().await.unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(h.local("a").await.unwrap()["title"], "remote");
    assert!(h.local("b").await.is_some());
}

#[tokio::test]
async fn find_deletes_entities_missing_upstream() {
    let h = harness("books");
    h.seed(json!({"id": "a"})).await;
    h.seed(json!({"id": "b"})).await;
    h.gateway.on_find(|_, _| Ok(vec![json!({"id": "a"})]));

    let dual = h
        .cache
        .find(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    let fetched = dual.network().await.unwrap();

    assert_eq!(fetched.len(), 1);
    assert!(h.local("a").await.is_some());
    assert!(h.local("b").await.is_none(), "b was deleted upstream");
}

#[tokio::test]
async fn find_uses_watermark_and_merges_changed_entities() {
    let h = harness("books");
    h.seed(json!({"id": "a", "v": 1, "_kmd": {"lmt": "2024-01-01T00:00:00Z"}}))
        .await;
    h.seed(json!({"id": "b", "v": 1, "_kmd": {"lmt": "2024-02-01T00:00:00Z"}}))
        .await;
    h.gateway.on_changed_since(|_, _, _| {
        Ok(vec![json!({"id": "b", "v": 2, "_kmd": {"lmt": "2024-03-01T00:00:00Z"}})])
    });

    let dual = h
        .cache
        .find(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    let fetched = dual.network().await.unwrap();

    let since = h
        .gateway
        .calls()
        .into_iter()
        .find_map(|c| match c {
            GatewayCall::ChangedSince { since, .. } => Some(since),
            _ => None,
        })
        .expect("delta fetch issued");
    assert_eq!(since, "2024-02-01T00:00:00Z");

    assert_eq!(fetched.len(), 2);
    assert_eq!(h.local("b").await.unwrap()["v"], 2);
    // A delta miss never deletes: "a" was not in the response but survives.
    assert!(h.local("a").await.is_some());
}

#[tokio::test]
async fn delta_and_full_fetch_converge_without_upstream_deletions() {
    let a1 = json!({"id": "a", "v": 1, "_kmd": {"lmt": "2024-01-01T00:00:00Z"}});
    let b = json!({"id": "b", "v": 1, "_kmd": {"lmt": "2024-01-02T00:00:00Z"}});
    let a2 = json!({"id": "a", "v": 2, "_kmd": {"lmt": "2024-05-01T00:00:00Z"}});

    let full = harness("books");
    full.seed(a1.clone()).await;
    full.seed(b.clone()).await;
    {
        let a2 = a2.clone();
        let b = b.clone();
        full.gateway.on_find(move |_, _| Ok(vec![a2.clone(), b.clone()]));
    }
    let dual = full.cache.find(&Query::empty(), &no_delta()).await.unwrap();
    dual.network().await.unwrap();

    let delta = harness("books");
    delta.seed(a1).await;
    delta.seed(b).await;
    {
        let a2 = a2.clone();
        delta.gateway.on_changed_since(move |_, _, _| Ok(vec![a2.clone()]));
    }
    let dual = delta
        .cache
        .find(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    dual.network().await.unwrap();

    assert_eq!(full.local("a").await, delta.local("a").await);
    assert_eq!(full.local("b").await, delta.local("b").await);
}

#[tokio::test]
async fn find_pushes_pending_mutations_before_fetching() {
    let h = harness("books");

    // Create an entity while offline so the ledger is non-empty.
    h.gateway.set_offline(true);
    let dual = h
        .cache
        .save(json!({"name": "A"}), &OperationOptions::default())
        .await
        .unwrap();
    assert!(dual.network().await.is_err());
    assert_eq!(h.cache.pending_sync_count(None).await.unwrap(), 1);

    // Back online: find drains the ledger, then fetches.
    h.gateway.set_offline(false);
    let dual = h
        .cache
        .find(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    dual.network().await.unwrap();

    assert_eq!(h.cache.pending_sync_count(None).await.unwrap(), 0);
    let calls = h.gateway.calls();
    let create_at = calls
        .iter()
        .position(|c| matches!(c, GatewayCall::Create { .. }))
        .expect("pending create pushed");
    let find_at = calls
        .iter()
        .rposition(|c| matches!(c, GatewayCall::Find { .. }))
        .expect("fetch issued");
    assert!(create_at < find_at, "push must precede the fetch");
}

#[tokio::test]
async fn find_network_phase_fails_pending_sync_when_push_cannot_drain() {
    let h = harness("books");
    h.seed(json!({"id": "a", "title": "stale"})).await;

    h.gateway.set_offline(true);
    let dual = h
        .cache
        .save(json!({"id": "a", "title": "edited"}), &OperationOptions::default())
        .await
        .unwrap();
    assert!(dual.network().await.is_err());

    // Still offline: the cache phase keeps serving, the network phase
    // reports the blockage.
    let dual = h
        .cache
        .find(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(dual.cache().len(), 1);
    assert_eq!(dual.cache()[0]["title"], "edited");

    let err = dual.network().await.unwrap_err();
    assert!(err.is_pending_sync(), "unexpected error: {err}");
}

#[tokio::test]
async fn find_rejects_non_object_filters() {
    let h = harness("books");
    let err = h
        .cache
        .find(&Query::new(json!(42)), &OperationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TideStoreError::InvalidArgument(_)));
}

#[tokio::test]
async fn find_by_id_remote_not_found_deletes_local_copy() {
    let h = harness("books");
    h.seed(json!({"id": "z"})).await;
    // Default gateway answers NotFound for by-id fetches.

    let dual = h
        .cache
        .find_by_id("z", &OperationOptions::default())
        .await
        .unwrap();
    assert!(dual.cache().is_some());

    let err = dual.network().await.unwrap_err();
    assert!(err.is_not_found(), "unexpected error: {err}");
    assert!(h.local("z").await.is_none(), "z must be deleted locally");
}

#[tokio::test]
async fn find_by_id_conditional_fetch_serves_cache_when_unchanged() {
    let h = harness("books");
    h.seed(json!({"id": "z", "v": 1, "_kmd": {"lmt": "2024-01-01T00:00:00Z"}}))
        .await;

    let dual = h
        .cache
        .find_by_id("z", &OperationOptions::default())
        .await
        .unwrap();
    let entity = dual.network().await.unwrap().unwrap();
    assert_eq!(entity["v"], 1);

    let calls = h.gateway.calls();
    assert!(
        calls.iter().any(|c| matches!(c, GatewayCall::ChangedSince { .. })),
        "conditional fetch expected"
    );
    assert!(
        !calls.iter().any(|c| matches!(c, GatewayCall::FindById { .. })),
        "no full by-id fetch expected"
    );
}

#[tokio::test]
async fn find_by_id_fetches_and_caches_unknown_entities() {
    let h = harness("books");
    h.gateway
        .on_find_by_id(|_, id| Ok(json!({"id": id, "title": "fresh"})));

    let dual = h
        .cache
        .find_by_id("n1", &OperationOptions::default())
        .await
        .unwrap();
    assert!(dual.cache().is_none());

    let entity = dual.network().await.unwrap().unwrap();
    assert_eq!(entity["title"], "fresh");
    assert_eq!(h.local("n1").await.unwrap()["title"], "fresh");
}

#[tokio::test]
async fn count_is_local_then_remote() {
    let h = harness("books");
    h.seed(json!({"id": "a"})).await;
    h.gateway.on_count(|_, _| Ok(7));

    let dual = h
        .cache
        .count(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(*dual.cache(), 1);
    assert_eq!(dual.network().await.unwrap(), 7);
}

#[tokio::test]
async fn group_aggregates_locally_then_delegates() {
    use tidestore::aggregation::Aggregation;

    let h = harness("books");
    h.seed(json!({"id": "a", "genre": "sf"})).await;
    h.seed(json!({"id": "b", "genre": "sf"})).await;
    h.gateway
        .on_group(|_, _| Ok(vec![json!({"genre": "sf", "count": 10})]));

    let dual = h
        .cache
        .group(&Aggregation::count(["genre"]), &OperationOptions::default())
        .await
        .unwrap();
    assert_eq!(dual.cache().len(), 1);
    assert_eq!(dual.cache()[0]["count"], 2);

    let remote = dual.network().await.unwrap();
    assert_eq!(remote[0]["count"], 10);
}

#[tokio::test]
async fn count_network_phase_gated_on_empty_ledger() {
    let h = harness("books");
    h.gateway.set_offline(true);
    let dual = h
        .cache
        .save(json!({"name": "pending"}), &OperationOptions::default())
        .await
        .unwrap();
    assert!(dual.network().await.is_err());

    let dual = h
        .cache
        .count(&Query::empty(), &OperationOptions::default())
        .await
        .unwrap();
    let err = dual.network().await.unwrap_err();
    assert!(err.is_pending_sync(), "unexpected error: {err}");
}
