//! Scans, ranges, search and lookups through StoreManager

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use stowage_core::{
    CollectingSink, ConnectionManager, DataStoreDescriptor, Direction, MemoryBackend, Notice,
    RangeQuery, Record, SchemaRegistry, StoreError, StoreManager,
};

type Manager = StoreManager<ConnectionManager<MemoryBackend>, CollectingSink>;

/// Store "entries" holding ids 1..=6 with a unique `slug` index
async fn seeded_manager() -> (Manager, MemoryBackend, CollectingSink) {
    let backend = MemoryBackend::new();
    let sink = CollectingSink::new();
    let registry = SchemaRegistry::new().with_store(
        "entries",
        DataStoreDescriptor::builder("entryStore")
            .key_path("id")
            .index("slug", "slug", true)
            .index("", "ignored", false)
            .build(),
    );
    let manager = StoreManager::with_backend(backend.clone(), registry, sink.clone());

    let rows = [
        (1, "alpha", "Hello world", json!(["rust", "wasm"])),
        (2, "beta", "hello again", json!(["go"])),
        (3, "gamma", "say HELLO", json!([])),
        (4, "delta", "yellow", json!(["rust"])),
        (5, "epsilon", "nothing here", json!(["trust"])),
        (6, "zeta", "othello", json!(["c"])),
    ];
    for (id, slug, msg, tags) in rows {
        manager
            .insert(
                "entries",
                &json!({"id": id, "slug": slug, "msg": msg, "tags": tags}),
            )
            .await
            .unwrap();
    }
    (manager, backend, sink)
}

fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().filter_map(|r| r["id"].as_i64()).collect()
}

#[tokio::test]
async fn test_scan_all_directions() {
    let (manager, _backend, _sink) = seeded_manager().await;

    let forward = manager.scan_all("entries", Direction::Next).await.unwrap();
    assert_eq!(ids(&forward), vec![1, 2, 3, 4, 5, 6]);

    let backward = manager
        .scan_all("entries", Direction::from_token("prevunique"))
        .await
        .unwrap();
    assert_eq!(ids(&backward), vec![6, 5, 4, 3, 2, 1]);

    let fallback = manager
        .scan_all("entries", Direction::from_token("sideways"))
        .await
        .unwrap();
    assert_eq!(ids(&fallback), vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_scan_range_inclusive_and_exclusive() {
    let (manager, _backend, _sink) = seeded_manager().await;

    let inclusive = manager
        .scan_range("entries", &RangeQuery::new(2, 5))
        .await
        .unwrap();
    assert_eq!(ids(&inclusive), vec![2, 3, 4, 5]);

    let exclusive = manager
        .scan_range("entries", &RangeQuery::new(2, 5).exclusive(true, true))
        .await
        .unwrap();
    assert_eq!(ids(&exclusive), vec![3, 4]);

    let half_open = manager
        .scan_range("entries", &RangeQuery::new(2, 5).exclusive(false, true))
        .await
        .unwrap();
    assert_eq!(ids(&half_open), vec![2, 3, 4]);
}

#[tokio::test]
async fn test_scan_range_rejects_bad_bounds_before_storage() {
    let (manager, backend, sink) = seeded_manager().await;
    let opened = backend.open_count();

    for query in [
        RangeQuery::new("", 5),
        RangeQuery::new(Value::Null, 5),
        RangeQuery::new(5, 2),
        RangeQuery::new(json!({"nested": true}), 5),
    ] {
        let result = manager.scan_range("entries", &query).await;
        assert!(matches!(result, Err(StoreError::RangeParameter(_))));
    }

    assert_eq!(backend.open_count(), opened);
    assert_eq!(
        sink.messages(),
        vec![Notice::RangeParameterFailure.text().to_string(); 4]
    );
}

#[tokio::test]
async fn test_search_substring_is_case_sensitive() {
    let (manager, _backend, _sink) = seeded_manager().await;

    let lower = manager
        .search_substring("entries", "msg", "ello")
        .await
        .unwrap();
    assert_eq!(ids(&lower), vec![1, 2, 4, 6]);

    let upper = manager
        .search_substring("entries", "msg", "HELLO")
        .await
        .unwrap();
    assert_eq!(ids(&upper), vec![3]);

    let missing_field = manager
        .search_substring("entries", "absent", "x")
        .await
        .unwrap();
    assert!(missing_field.is_empty());
}

#[tokio::test]
async fn test_search_substring_matches_array_elements() {
    let (manager, _backend, _sink) = seeded_manager().await;

    let tagged = manager
        .search_substring("entries", "tags", "rust")
        .await
        .unwrap();
    assert_eq!(ids(&tagged), vec![1, 4]);
}

#[tokio::test]
async fn test_search_substring_rejects_empty_parameters() {
    let (manager, backend, sink) = seeded_manager().await;
    let opened = backend.open_count();

    let empty_keyword = manager.search_substring("entries", "msg", "").await;
    assert!(matches!(empty_keyword, Err(StoreError::SearchParameter(_))));
    let empty_field = manager.search_substring("entries", "", "hello").await;
    assert!(matches!(empty_field, Err(StoreError::SearchParameter(_))));

    assert_eq!(backend.open_count(), opened);
    assert_eq!(
        sink.messages(),
        vec![Notice::SearchParameterFailure.text().to_string(); 2]
    );
}

#[tokio::test]
async fn test_lookup_by_index() {
    let (manager, _backend, sink) = seeded_manager().await;

    let hit = manager
        .lookup_by_index("entries", "slug", &json!("delta"))
        .await
        .unwrap();
    assert_eq!(hit.map(|r| r["id"].clone()), Some(json!(4)));

    let miss = manager
        .lookup_by_index("entries", "slug", &json!("omega"))
        .await
        .unwrap();
    assert_eq!(miss, None);

    let unknown = manager
        .lookup_by_index("entries", "ignored", &json!("x"))
        .await;
    assert!(matches!(unknown, Err(StoreError::UnknownIndex(_))));
    assert_eq!(sink.messages(), vec![Notice::QueryUnsuccessful.text().to_string()]);
}

#[tokio::test]
async fn test_lookup_by_key_and_bounds() {
    let (manager, backend, _sink) = seeded_manager().await;

    let hit = manager.lookup_by_key("entries", &json!(3)).await.unwrap();
    assert_eq!(hit.map(|r| r["slug"].clone()), Some(json!("gamma")));
    assert_eq!(manager.lookup_by_key("entries", &json!(99)).await.unwrap(), None);

    let first = manager.first("entries").await.unwrap();
    let last = manager.last("entries").await.unwrap();
    assert_eq!(first.map(|r| r["id"].clone()), Some(json!(1)));
    assert_eq!(last.map(|r| r["id"].clone()), Some(json!(6)));

    assert_eq!(backend.open_connections(), 0);
}
