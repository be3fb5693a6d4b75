//! Integration tests for SurrealDB schema initialization and the embedded
//! (`surrealkv://`) backend.

use serde_json::json;
use spiral_state::{node_key, KvStore, SurrealKvStore};

#[tokio::test]
async fn test_embedded_store_creates_directory_and_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("db");

    let store = SurrealKvStore::connect_embedded(&path)
        .await
        .expect("embedded store should open");
    assert!(path.exists(), "database directory should be created");

    store
        .set(&node_key("n-1"), json!({"content": "persisted"}))
        .await
        .unwrap();

    let loaded = store.get(&node_key("n-1")).await.unwrap().unwrap();
    assert_eq!(loaded["content"], "persisted");
}

#[tokio::test]
async fn test_reinitialising_schema_keeps_data() {
    let store = SurrealKvStore::connect_memory().await.unwrap();
    store.set(&node_key("keep"), json!({"v": 1})).await.unwrap();

    store.init().await.unwrap();

    assert_eq!(store.keys("mem:").await.unwrap(), vec!["mem:keep".to_string()]);
}

#[tokio::test]
async fn test_clones_share_one_connection() {
    let store = SurrealKvStore::connect_memory().await.unwrap();
    let clone = store.clone();

    store.set(&node_key("shared"), json!(true)).await.unwrap();
    assert_eq!(clone.get(&node_key("shared")).await.unwrap(), Some(json!(true)));
}
