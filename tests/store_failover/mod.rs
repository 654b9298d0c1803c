use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config_refresh::BusRefreshPublisher;
use config_refresh::ChangeWatcher;
use config_refresh::ConnectOptions;
use config_refresh::DistributedLock;
use config_refresh::KeyPrefix;
use config_refresh::KeyPrefixOrder;
use config_refresh::LocalLockService;
use config_refresh::LockError;
use config_refresh::LockErrorKind;
use config_refresh::LockService;
use config_refresh::MemoryStore;
use config_refresh::StoreConnector;
use config_refresh::WatcherState;

use crate::common::enable_logger;
use crate::common::eventually;
use crate::common::fast_reconnect;
use crate::common::lock_config;
use crate::common::start_node;

fn order() -> KeyPrefixOrder {
    KeyPrefixOrder::new(vec![KeyPrefix::Application, KeyPrefix::Profile]).unwrap()
}

struct UnreachableLockService;

#[async_trait]
impl LockService for UnreachableLockService {
    async fn try_acquire(
        &self,
        lock_name: &str,
        _owner: &str,
        _lease: Duration,
    ) -> Result<bool, LockError> {
        Err(LockError::new(LockErrorKind::Unavailable, lock_name, "connection refused"))
    }
}

#[tokio::test]
async fn test_broken_watch_resumes_without_loss_or_replay() {
    enable_logger();
    let store = MemoryStore::new();
    let locks = Arc::new(LocalLockService::new());
    let mut node = start_node("config-node-1", &store, &locks, &lock_config(true, 1, 5), &order()).await;

    store.insert("orders.prod.timeout", "30");
    eventually(|| node.watcher.stats().refreshes_published == 1).await;

    store.break_watches();
    store.insert("billing.prod.limit", "9");

    eventually(|| node.watcher.stats().refreshes_published == 2).await;
    let destinations: Vec<_> = node.drain().into_iter().map(|e| e.destination).collect();
    assert_eq!(destinations, vec!["orders", "billing"]);
    assert!(node.watcher.stats().reconnects >= 1);
    assert_eq!(node.watcher.state(), WatcherState::Watching);

    node.watcher.shutdown().await;
}

#[tokio::test]
async fn test_changes_made_during_outage_are_delivered_once_back() {
    let store = MemoryStore::new();
    let locks = Arc::new(LocalLockService::new());
    let config = lock_config(true, 1, 5);
    let mut a = start_node("config-node-a", &store, &locks, &config, &order()).await;
    let mut b = start_node("config-node-b", &store, &locks, &config, &order()).await;

    store.insert("orders.dev.timeout", "5");
    eventually(|| a.watcher.stats().events_seen == 1 && b.watcher.stats().events_seen == 1).await;
    let _ = (a.drain(), b.drain());

    store.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    store.insert("search.dev.size", "10");
    store.set_reachable(true);

    eventually(|| {
        let (sa, sb) = (a.watcher.stats(), b.watcher.stats());
        sa.events_seen == 2 && sb.events_seen == 2 && sa.refreshes_published + sb.refreshes_published == 2
    })
    .await;
    eventually(|| a.watcher.stats().duplicates_skipped + b.watcher.stats().duplicates_skipped == 2).await;

    let mut published = a.drain();
    published.extend(b.drain());
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].destination, "search");
    assert!(a.watcher.stats().reconnects >= 1);

    a.watcher.shutdown().await;
    b.watcher.shutdown().await;
}

#[tokio::test]
async fn test_outage_before_any_event_loses_nothing() {
    let store = MemoryStore::new();
    let locks = Arc::new(LocalLockService::new());
    let config = lock_config(true, 1, 5);
    let mut a = start_node("config-node-a", &store, &locks, &config, &order()).await;
    let mut b = start_node("config-node-b", &store, &locks, &config, &order()).await;

    store.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    store.insert("search.dev.size", "10");
    store.set_reachable(true);

    eventually(|| a.watcher.stats().events_seen == 1 && b.watcher.stats().events_seen == 1).await;
    eventually(|| a.watcher.stats().duplicates_skipped + b.watcher.stats().duplicates_skipped == 1).await;

    let mut published = a.drain();
    published.extend(b.drain());
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].destination, "search");

    a.watcher.shutdown().await;
    b.watcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_lock_service_fails_open_on_every_node() {
    let store = MemoryStore::new();
    let mut watchers = Vec::new();
    let mut receivers = Vec::new();

    for i in 0..2 {
        let connector = StoreConnector::new(vec!["memory".to_string()], Arc::new(store.clone()));
        connector.connect(ConnectOptions::default()).await.unwrap();
        let publisher = Arc::new(BusRefreshPublisher::new(format!("config-node-{i}"), 16));
        receivers.push(publisher.subscribe());
        let lock = DistributedLock::new(&lock_config(true, 1, 5), Arc::new(UnreachableLockService));
        let watcher = ChangeWatcher::new(Arc::new(connector), Arc::new(lock), publisher, order())
            .with_reconnect_policy(fast_reconnect());
        watcher.start().await.unwrap();
        watchers.push(watcher);
    }

    store.insert("orders.prod.timeout", "30");
    eventually(|| watchers.iter().all(|w| w.stats().refreshes_published == 1)).await;

    for rx in receivers.iter_mut() {
        assert_eq!(rx.try_recv().unwrap().destination, "orders");
    }
    for w in watchers {
        w.shutdown().await;
    }
}
