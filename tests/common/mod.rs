use std::sync::Arc;
use std::time::Duration;

use config_refresh::BackoffPolicy;
use config_refresh::BusRefreshPublisher;
use config_refresh::ChangeWatcher;
use config_refresh::ConnectOptions;
use config_refresh::DistributedLock;
use config_refresh::KeyPrefixOrder;
use config_refresh::LocalLockService;
use config_refresh::LockConfig;
use config_refresh::MemoryStore;
use config_refresh::RefreshEvent;
use config_refresh::StoreConnector;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio::time::timeout;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for integration test.");
}

/// One simulated configuration node: its own connector, lock client, bus and
/// watcher, sharing the store and the lock service with its peers.
pub struct TestNode {
    pub watcher: ChangeWatcher,
    pub events: broadcast::Receiver<RefreshEvent>,
}

impl TestNode {
    /// Drains every refresh event published so far.
    pub fn drain(&mut self) -> Vec<RefreshEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn lock_config(
    enabled: bool,
    wait_secs: u64,
    lease_secs: u64,
) -> LockConfig {
    LockConfig {
        distributed_lock_enabled: enabled,
        lock_wait_time: wait_secs,
        lock_lease_time: lease_secs,
        ..LockConfig::default()
    }
}

pub fn fast_reconnect() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 1000,
        base_delay_ms: 10,
        max_delay_ms: 100,
    }
}

pub async fn start_node(
    bus_id: &str,
    store: &MemoryStore,
    locks: &Arc<LocalLockService>,
    lock: &LockConfig,
    order: &KeyPrefixOrder,
) -> TestNode {
    let connector = StoreConnector::new(vec![format!("memory://{bus_id}")], Arc::new(store.clone()));
    connector.connect(ConnectOptions::default()).await.unwrap();

    let publisher = Arc::new(BusRefreshPublisher::new(bus_id, 64));
    let events = publisher.subscribe();

    let watcher = ChangeWatcher::new(
        Arc::new(connector),
        Arc::new(DistributedLock::new(lock, locks.clone())),
        publisher,
        order.clone(),
    )
    .with_reconnect_policy(fast_reconnect());
    watcher.start().await.unwrap();

    TestNode { watcher, events }
}

pub async fn eventually(cond: impl Fn() -> bool) {
    timeout(Duration::from_secs(20), async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
