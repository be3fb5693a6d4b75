//! End-to-end tests for storing, retrieving and reloading memory nodes.

use std::collections::HashMap;
use std::sync::Arc;

use spiral_core::{
    generate_signature, EngineConfig, EngineError, KvStore, MemoryEngine, MemoryKvStore,
    MemoryNode, SearchQuery, Tier,
};
use spiral_state::{node_key, sigil_key, SurrealKvStore};

const CATEGORIES: [&str; 5] = ["general", "technical", "personal", "creative", "factual"];

async fn engine_on(kv: Arc<dyn KvStore>, config: EngineConfig) -> MemoryEngine {
    let engine = MemoryEngine::builder(config).kv(kv).build().unwrap();
    engine.initialize().await.unwrap();
    engine
}

async fn all_nodes(engine: &MemoryEngine) -> HashMap<String, MemoryNode> {
    engine
        .search(&SearchQuery::default().with_limit(usize::MAX))
        .await
        .unwrap()
        .into_iter()
        .map(|n| (n.id.clone(), n))
        .collect()
}

#[tokio::test]
async fn test_store_then_retrieve_matches_generated_signature() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;

    let stored = engine
        .store("note-1", "general", Tier::Shallow, &[])
        .await
        .unwrap();
    let fetched = engine.retrieve(&stored.id).await.unwrap().unwrap();

    assert_eq!(fetched.content, "note-1");
    assert_eq!(
        fetched.sigil.signature,
        generate_signature("note-1", "general", Tier::Shallow).signature
    );
    assert_eq!(fetched.partition_id, stored.partition_id);
}

#[tokio::test]
async fn test_missing_node_is_none_not_error() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    assert!(engine.retrieve("nope").await.unwrap().is_none());
    assert!(engine
        .retrieve_by_signature("GL-0000000000000000")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_repeated_retrieve_only_changes_access_metadata() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    let stored = engine
        .store("stable", "technical", Tier::Deep, &[])
        .await
        .unwrap();

    let first = engine.retrieve(&stored.id).await.unwrap().unwrap();
    let second = engine.retrieve(&stored.id).await.unwrap().unwrap();

    assert_eq!(first.content, second.content);
    assert_eq!(first.sigil, second.sigil);
    assert_eq!(first.partition_id, second.partition_id);
    assert_eq!(first.position, second.position);
    assert_eq!(first.access_count, 1);
    assert_eq!(second.access_count, 2);
    assert!(second.last_accessed >= first.last_accessed);
}

#[tokio::test]
async fn test_every_read_rekeys_the_single_queue_entry() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    let a = engine.store("a", "general", Tier::Shallow, &[]).await.unwrap();
    engine.store("b", "general", Tier::Shallow, &[]).await.unwrap();
    assert_eq!(engine.gc_queue_key(&a.id).await, Some(a.last_accessed));

    let read = engine.retrieve(&a.id).await.unwrap().unwrap();
    assert_eq!(engine.gc_queue_key(&a.id).await, Some(read.last_accessed));

    let read = engine
        .retrieve_by_signature(&a.sigil.signature)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(read.access_count, 2);
    assert_eq!(engine.gc_queue_key(&a.id).await, Some(read.last_accessed));

    let stats = engine.get_statistics().await.unwrap();
    assert_eq!(stats.gc_queue_size, stats.total_nodes);
}

#[tokio::test]
async fn test_signature_lookups_hit_the_cache() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    let node = engine.store("cached", "general", Tier::Shallow, &[]).await.unwrap();

    for _ in 0..3 {
        engine
            .retrieve_by_signature(&node.sigil.signature)
            .await
            .unwrap()
            .unwrap();
    }
    let cache = engine.get_statistics().await.unwrap().sigil_cache;
    assert_eq!(cache.misses, 1);
    assert_eq!(cache.hits, 2);
    assert_eq!(cache.len, 1);
}

#[tokio::test]
async fn test_duplicate_content_gets_distinct_signatures() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    let first = engine.store("same", "general", Tier::Shallow, &[]).await.unwrap();
    let second = engine.store("same", "general", Tier::Shallow, &[]).await.unwrap();

    assert_ne!(first.sigil.signature, second.sigil.signature);
    assert_eq!(second.sigil.signature, format!("{}~2", first.sigil.signature));
    let by_sig = engine
        .retrieve_by_signature(&second.sigil.signature)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_sig.id, second.id);
}

#[tokio::test]
async fn test_large_association_lists_link_in_background() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    let mut peers = Vec::new();
    for i in 0..8 {
        let n = engine
            .store(&format!("peer {i}"), "general", Tier::Deep, &[])
            .await
            .unwrap();
        peers.push(n.id);
    }

    let hub = engine
        .store("hub", "general", Tier::Deep, &peers)
        .await
        .unwrap();
    assert_eq!(
        hub.associations.len(),
        engine.config().deferred_association_threshold
    );

    engine.flush_pending_links().await;
    let hub = engine.retrieve(&hub.id).await.unwrap().unwrap();
    assert_eq!(hub.associations.len(), peers.len());
    for peer in &peers {
        let peer = engine.retrieve(peer).await.unwrap().unwrap();
        assert!(peer.associations.contains(&hub.id));
    }
}

#[tokio::test]
async fn test_associate_links_both_sides() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    let a = engine.store("a", "personal", Tier::Deep, &[]).await.unwrap();
    let b = engine.store("b", "personal", Tier::Deep, &[]).await.unwrap();

    assert!(engine.associate(&a.id, &b.id).await.unwrap());
    assert!(!engine.associate(&a.id, &b.id).await.unwrap());
    assert!(!engine.associate(&a.id, "ghost").await.unwrap());
    assert!(!engine.associate(&a.id, &a.id).await.unwrap());

    let a = engine.retrieve(&a.id).await.unwrap().unwrap();
    let b = engine.retrieve(&b.id).await.unwrap().unwrap();
    assert!(a.associations.contains(&b.id));
    assert!(b.associations.contains(&a.id));
}

#[tokio::test]
async fn test_placement_respects_partition_bounds() {
    let engine = engine_on(Arc::new(MemoryKvStore::new()), EngineConfig::in_memory()).await;
    for i in 0..200 {
        let category = CATEGORIES[i % CATEGORIES.len()];
        let tier = Tier::ALL[(i / CATEGORIES.len()) % Tier::ALL.len()];
        engine
            .store(&format!("item {i} about {category}"), category, tier, &[])
            .await
            .unwrap();
    }

    let partitions = engine.partitions().await;
    assert!(partitions.len() <= engine.config().max_partitions);
    assert!(partitions.iter().all(|p| p.node_count <= p.capacity));
    assert_eq!(partitions.iter().map(|p| p.node_count).sum::<usize>(), 200);
}

#[tokio::test]
async fn test_capacity_exceeded_at_hard_cap() {
    let mut config = EngineConfig::in_memory();
    config.max_partitions = 3;
    config.max_nodes_per_partition = 10;
    let engine = engine_on(Arc::new(MemoryKvStore::new()), config).await;

    let mut stored = 0;
    let err = loop {
        let category = CATEGORIES[stored % CATEGORIES.len()];
        match engine
            .store(&format!("n{stored}"), category, Tier::Shallow, &[])
            .await
        {
            Ok(_) => stored += 1,
            Err(e) => break e,
        }
        assert!(stored <= 30, "cap not enforced");
    };

    assert!(matches!(err, EngineError::CapacityExceeded { max_partitions: 3 }));
    assert_eq!(stored, 30);
    assert_eq!(engine.partitions().await.len(), 3);
}

#[tokio::test]
async fn test_persistence_failure_keeps_in_memory_write() {
    let kv = Arc::new(MemoryKvStore::new());
    let engine = engine_on(kv.clone(), EngineConfig::in_memory()).await;

    kv.set_fail_writes(true);
    let err = engine
        .store("unmirrored", "general", Tier::Shallow, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PersistenceFailure(_)));
    kv.set_fail_writes(false);

    let hits = engine.search(&SearchQuery::new("unmirrored")).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(kv.get(&node_key(&hits[0].id)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reload_reproduces_nodes_partitions_and_sigils() {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let first = engine_on(kv.clone(), EngineConfig::in_memory()).await;

    let mut previous: Vec<String> = Vec::new();
    for i in 0..40 {
        let category = CATEGORIES[i % CATEGORIES.len()];
        let tier = Tier::ALL[i % Tier::ALL.len()];
        let peers: Vec<String> = previous.iter().rev().take(2).cloned().collect();
        let node = first
            .store(&format!("memory number {i}"), category, tier, &peers)
            .await
            .unwrap();
        previous.push(node.id);
    }
    first.retrieve(&previous[0]).await.unwrap();
    let before = all_nodes(&first).await;
    let partitions_before = first.partitions().await;
    first.shutdown().await.unwrap();

    let second = engine_on(kv.clone(), EngineConfig::in_memory()).await;
    let after = all_nodes(&second).await;
    let partitions_after = second.partitions().await;

    assert_eq!(before.len(), after.len());
    for (id, old) in &before {
        let new = &after[id];
        assert_eq!(old.content, new.content);
        assert_eq!(old.category, new.category);
        assert_eq!(old.tier, new.tier);
        assert_eq!(old.sigil.signature, new.sigil.signature);
        assert_eq!(old.partition_id, new.partition_id);
        assert_eq!(old.position.index, new.position.index);
        assert_eq!(old.associations, new.associations);
        assert_eq!(old.created_at, new.created_at);
        assert_eq!(old.last_accessed, new.last_accessed);
        assert_eq!(old.access_count, new.access_count);
        assert!((old.strength - new.strength).abs() < 1e-12);
    }

    let ids = |ps: &[spiral_core::Partition]| {
        ps.iter()
            .map(|p| (p.id.clone(), p.node_count))
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&partitions_before), ids(&partitions_after));

    let stats = second.get_statistics().await.unwrap();
    assert_eq!(stats.total_sigils, before.len());
    for node in before.values() {
        assert!(kv.get(&sigil_key(&node.sigil.signature)).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_reload_from_embedded_store() {
    let dir = tempfile::tempdir().unwrap();
    let kv: Arc<dyn KvStore> =
        Arc::new(SurrealKvStore::connect_embedded(dir.path().join("db")).await.unwrap());

    let first = engine_on(kv.clone(), EngineConfig::in_memory()).await;
    let node = first
        .store("durable", "factual", Tier::Core, &[])
        .await
        .unwrap();
    first.shutdown().await.unwrap();

    let second = engine_on(kv, EngineConfig::in_memory()).await;
    let reloaded = second.retrieve(&node.id).await.unwrap().unwrap();
    assert_eq!(reloaded.content, "durable");
    assert_eq!(reloaded.tier, Tier::Core);
    assert_eq!(reloaded.sigil, node.sigil);
}
