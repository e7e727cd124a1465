//! Insert, update, delete and count through StoreManager

use pretty_assertions::assert_eq;
use serde_json::json;
use stowage_core::{
    CollectingSink, ConnectionManager, Connector, DataStoreDescriptor, Direction, Key,
    MemoryBackend, Notice, SchemaRegistry, StoreError, StoreManager,
};

const SCHEMA: &str = r#"{
    "exampleOneDb": {
        "version": 1,
        "storeName": "objectStore",
        "keyConfig": {"keyPath": "id", "autoIncrement": true},
        "indexes": [
            ["dateTime", "dateTime", {"unique": false}],
            ["record", "record", {"unique": false}]
        ]
    }
}"#;

type Manager = StoreManager<ConnectionManager<MemoryBackend>, CollectingSink>;

fn create_manager() -> (Manager, MemoryBackend, CollectingSink) {
    let backend = MemoryBackend::new();
    let sink = CollectingSink::new();
    let registry = SchemaRegistry::from_json_str(SCHEMA).unwrap();
    let manager = StoreManager::with_backend(backend.clone(), registry, sink.clone());
    (manager, backend, sink)
}

#[tokio::test]
async fn test_fresh_store_is_empty() {
    let (manager, backend, sink) = create_manager();

    let connection = manager.initialize("exampleOneDb").await.unwrap();
    manager.connector().release(&connection);

    assert_eq!(manager.count("exampleOneDb").await.unwrap(), 0);
    assert_eq!(backend.object_store_names("exampleOneDb"), vec!["objectStore"]);
    assert_eq!(
        backend.index_names("exampleOneDb", "objectStore"),
        vec!["dateTime", "record"]
    );
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_insert_and_lookup_round_trip() {
    let (manager, _backend, _sink) = create_manager();
    let record = json!({"id": 1, "dateTime": "t", "record": "r"});

    let key = manager.insert("exampleOneDb", &record).await.unwrap();
    assert_eq!(key, Key::from(1));

    let found = manager.lookup_by_key("exampleOneDb", &json!(1)).await.unwrap();
    assert_eq!(found, Some(record));
}

#[tokio::test]
async fn test_insert_generates_keys() {
    let (manager, _backend, _sink) = create_manager();

    let first = manager
        .insert("exampleOneDb", &json!({"record": "a"}))
        .await
        .unwrap();
    let second = manager
        .insert("exampleOneDb", &json!({"record": "b"}))
        .await
        .unwrap();
    assert_eq!(first, Key::from(1));
    assert_eq!(second, Key::from(2));

    let stored = manager.lookup_by_key("exampleOneDb", &json!(2)).await.unwrap();
    assert_eq!(stored, Some(json!({"id": 2, "record": "b"})));
}

#[tokio::test]
async fn test_insert_collision_is_reported() {
    let (manager, backend, sink) = create_manager();
    manager
        .insert("exampleOneDb", &json!({"id": 1, "record": "first"}))
        .await
        .unwrap();

    let result = manager
        .insert("exampleOneDb", &json!({"id": 1, "record": "second"}))
        .await;

    assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    assert_eq!(sink.messages(), vec![Notice::SaveUnsuccessful.text().to_string()]);
    let kept = manager.lookup_by_key("exampleOneDb", &json!(1)).await.unwrap();
    assert_eq!(kept, Some(json!({"id": 1, "record": "first"})));
    assert_eq!(backend.open_connections(), 0);
}

#[tokio::test]
async fn test_insert_non_object_fails_before_storage() {
    let (manager, backend, sink) = create_manager();

    let result = manager.insert("exampleOneDb", &json!("just text")).await;

    assert!(matches!(result, Err(StoreError::TypeMismatch(_))));
    assert_eq!(sink.messages(), vec![Notice::NotObject.text().to_string()]);
    assert_eq!(backend.open_count(), 0);
}

#[tokio::test]
async fn test_update_by_match() {
    let (manager, _backend, sink) = create_manager();
    for (id, record) in [(1, "a"), (2, "same"), (3, "same")] {
        manager
            .insert("exampleOneDb", &json!({"id": id, "record": record}))
            .await
            .unwrap();
    }

    let updated = manager
        .update_by_match(
            "exampleOneDb",
            &json!({"record": "same", "id": 3}),
            &json!({"id": 3, "record": "changed"}),
        )
        .await
        .unwrap();
    assert_eq!(updated, Some(Key::from(3)));

    let all = manager
        .scan_all("exampleOneDb", "next".into())
        .await
        .unwrap();
    assert_eq!(
        all,
        vec![
            json!({"id": 1, "record": "a"}),
            json!({"id": 2, "record": "same"}),
            json!({"id": 3, "record": "changed"}),
        ]
    );
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_update_by_match_without_match_changes_nothing() {
    let (manager, _backend, sink) = create_manager();
    manager
        .insert("exampleOneDb", &json!({"id": 1, "record": "a"}))
        .await
        .unwrap();

    let updated = manager
        .update_by_match(
            "exampleOneDb",
            &json!({"id": 1, "record": "b"}),
            &json!({"id": 1, "record": "c"}),
        )
        .await
        .unwrap();

    assert_eq!(updated, None);
    assert!(sink.is_empty());
    let kept = manager.lookup_by_key("exampleOneDb", &json!(1)).await.unwrap();
    assert_eq!(kept, Some(json!({"id": 1, "record": "a"})));
}

#[tokio::test]
async fn test_update_by_match_replaces_first_of_identical_records() {
    let registry = SchemaRegistry::new().with_store(
        "logDb",
        DataStoreDescriptor::builder("entries")
            .auto_increment(true)
            .build(),
    );
    let manager =
        StoreManager::with_backend(MemoryBackend::new(), registry, CollectingSink::new());
    for _ in 0..2 {
        manager.insert("logDb", &json!({"v": "same"})).await.unwrap();
    }

    let updated = manager
        .update_by_match("logDb", &json!({"v": "same"}), &json!({"v": "new"}))
        .await
        .unwrap();

    assert_eq!(updated, Some(Key::from(1)));
    assert_eq!(
        manager.scan_all("logDb", Direction::Next).await.unwrap(),
        vec![json!({"v": "new"}), json!({"v": "same"})]
    );
    assert!(manager.sink().is_empty());
}

#[tokio::test]
async fn test_update_by_key() {
    let (manager, _backend, sink) = create_manager();
    manager
        .insert("exampleOneDb", &json!({"id": 5, "record": "old"}))
        .await
        .unwrap();

    let key = manager
        .update_by_key("exampleOneDb", &json!({"id": 5, "record": "new"}))
        .await
        .unwrap();
    assert_eq!(key, Key::from(5));
    let stored = manager.lookup_by_key("exampleOneDb", &json!(5)).await.unwrap();
    assert_eq!(stored, Some(json!({"id": 5, "record": "new"})));

    let missing = manager
        .update_by_key("exampleOneDb", &json!({"id": 6, "record": "x"}))
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
    assert_eq!(sink.messages(), vec![Notice::UpdateUnsuccessful.text().to_string()]);
}

#[tokio::test]
async fn test_delete_by_key_and_clear() {
    let (manager, backend, _sink) = create_manager();
    for id in 1..=3 {
        manager
            .insert("exampleOneDb", &json!({"id": id}))
            .await
            .unwrap();
    }

    manager.delete_by_key("exampleOneDb", &json!(2)).await.unwrap();
    assert_eq!(manager.count("exampleOneDb").await.unwrap(), 2);
    assert_eq!(
        manager.lookup_by_key("exampleOneDb", &json!(2)).await.unwrap(),
        None
    );

    manager.clear("exampleOneDb").await.unwrap();
    assert_eq!(manager.count("exampleOneDb").await.unwrap(), 0);
    assert_eq!(backend.open_connections(), 0);
}

#[tokio::test]
async fn test_joined_inserts_release_their_connections() {
    let (manager, backend, _sink) = create_manager();

    let rec_a = json!({"id": 1, "record": "a"});
    let rec_b = json!({"id": 2, "record": "b"});
    let (a, b) = tokio::join!(
        manager.insert("exampleOneDb", &rec_a),
        manager.insert("exampleOneDb", &rec_b),
    );

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(manager.count("exampleOneDb").await.unwrap(), 2);
    assert_eq!(backend.open_connections(), 0);
}
