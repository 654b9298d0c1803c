use std::sync::Arc;
use std::time::Duration;

use config_refresh::KeyPrefix;
use config_refresh::KeyPrefixOrder;
use config_refresh::LocalLockService;
use config_refresh::MemoryStore;

use crate::common::enable_logger;
use crate::common::eventually;
use crate::common::lock_config;
use crate::common::start_node;
use crate::common::TestNode;

fn full_order() -> KeyPrefixOrder {
    KeyPrefixOrder::new(vec![KeyPrefix::Application, KeyPrefix::Profile, KeyPrefix::Label]).unwrap()
}

async fn cluster(
    store: &MemoryStore,
    locks: &Arc<LocalLockService>,
    enabled: bool,
    order: &KeyPrefixOrder,
) -> Vec<TestNode> {
    let config = lock_config(enabled, 1, 5);
    let mut nodes = Vec::new();
    for i in 1..=3 {
        nodes.push(start_node(&format!("config-node-{i}"), store, locks, &config, order).await);
    }
    nodes
}

fn settled(
    nodes: &[TestNode],
    events: u64,
) -> bool {
    nodes.iter().all(|n| {
        let stats = n.watcher.stats();
        stats.events_seen == events && stats.refreshes_published + stats.duplicates_skipped == events
    })
}

async fn shutdown(nodes: Vec<TestNode>) {
    for node in nodes {
        node.watcher.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_one_change_seen_by_every_node_is_published_once() {
    enable_logger();
    let store = MemoryStore::new();
    let locks = Arc::new(LocalLockService::new());
    let mut nodes = cluster(&store, &locks, true, &full_order()).await;

    store.insert("billing.dev.main.limit", "100");
    eventually(|| settled(&nodes, 1)).await;

    let published: Vec<_> = nodes.iter_mut().flat_map(|n| n.drain()).collect();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].destination, "billing");
    assert!(published[0].origin_service.starts_with("config-node-"));
    assert!(locks.holder("billing.dev.main.limit:100").is_some());

    shutdown(nodes).await;
}

#[tokio::test(start_paused = true)]
async fn test_dedup_disabled_every_node_publishes() {
    let store = MemoryStore::new();
    let locks = Arc::new(LocalLockService::new());
    let mut nodes = cluster(&store, &locks, false, &full_order()).await;

    store.insert("orders.prod.v1.timeout", "30");
    eventually(|| settled(&nodes, 1)).await;

    let published: Vec<_> = nodes.iter_mut().flat_map(|n| n.drain()).collect();
    assert_eq!(published.len(), 3);
    assert!(published.iter().all(|e| e.destination == "orders"));
    assert_eq!(locks.holder("orders.prod.v1.timeout:30"), None);

    shutdown(nodes).await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_value_within_lease_is_suppressed_new_value_is_not() {
    let store = MemoryStore::new();
    let locks = Arc::new(LocalLockService::new());
    let mut nodes = cluster(&store, &locks, true, &full_order()).await;

    store.insert("orders.prod.v1.timeout", "30");
    eventually(|| settled(&nodes, 1)).await;

    // same key and value while the first lease is alive
    store.insert("orders.prod.v1.timeout", "30");
    eventually(|| settled(&nodes, 2)).await;

    store.insert("orders.prod.v1.timeout", "45");
    eventually(|| settled(&nodes, 3)).await;

    let published: Vec<_> = nodes.iter_mut().flat_map(|n| n.drain()).collect();
    assert_eq!(published.len(), 2);

    let refreshed: u64 = nodes.iter().map(|n| n.watcher.stats().refreshes_published).sum();
    assert_eq!(refreshed, 2);

    // once the lease is gone the same value refreshes again
    tokio::time::sleep(Duration::from_secs(6)).await;
    store.insert("orders.prod.v1.timeout", "30");
    eventually(|| settled(&nodes, 4)).await;
    let published: Vec<_> = nodes.iter_mut().flat_map(|n| n.drain()).collect();
    assert_eq!(published.len(), 1);

    shutdown(nodes).await;
}

#[tokio::test(start_paused = true)]
async fn test_flat_namespace_refreshes_every_application() {
    let store = MemoryStore::new();
    let locks = Arc::new(LocalLockService::new());
    let mut nodes = cluster(&store, &locks, true, &KeyPrefixOrder::default()).await;

    store.insert("timeout", "30");
    eventually(|| settled(&nodes, 1)).await;

    let published: Vec<_> = nodes.iter_mut().flat_map(|n| n.drain()).collect();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].destination, "*");

    shutdown(nodes).await;
}

#[tokio::test(start_paused = true)]
async fn test_deletes_never_publish() {
    let store = MemoryStore::new();
    store.insert("orders.prod.v1.timeout", "30");
    let locks = Arc::new(LocalLockService::new());
    let mut nodes = cluster(&store, &locks, true, &full_order()).await;

    store.remove("orders.prod.v1.timeout");
    eventually(|| nodes.iter().all(|n| n.watcher.stats().disruptive_events == 1)).await;

    let published: Vec<_> = nodes.iter_mut().flat_map(|n| n.drain()).collect();
    assert!(published.is_empty());

    shutdown(nodes).await;
}
