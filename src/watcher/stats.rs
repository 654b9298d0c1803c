use prometheus::IntCounter;
use prometheus::Opts;
use prometheus::Registry;

/// Counters kept by one watcher worker, registered on a registry owned by
/// that watcher so several watchers can live in one process.
#[derive(Debug, Clone)]
pub struct WatcherStats {
    registry: Registry,
    events_seen: IntCounter,
    refreshes_published: IntCounter,
    duplicates_skipped: IntCounter,
    disruptive_events: IntCounter,
    reconnects: IntCounter,
}

/// Point-in-time copy of [`WatcherStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherStatsSnapshot {
    pub events_seen: u64,
    /// Refreshes this node ran, with or without the lock
    pub refreshes_published: u64,
    /// Changes another node already refreshed
    pub duplicates_skipped: u64,
    /// DELETE and unclassifiable events
    pub disruptive_events: u64,
    pub reconnects: u64,
}

impl Default for WatcherStats {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherStats {
    pub fn new() -> Self {
        let registry = Registry::new();
        Self {
            events_seen: register_counter(&registry, "watch_events_total", "Store events received by the watcher"),
            refreshes_published: register_counter(
                &registry,
                "refreshes_published_total",
                "Refresh notifications published by this node",
            ),
            duplicates_skipped: register_counter(
                &registry,
                "refreshes_skipped_total",
                "Refreshes skipped because another node holds the lock",
            ),
            disruptive_events: register_counter(
                &registry,
                "disruptive_events_total",
                "DELETE and unclassifiable store events",
            ),
            reconnects: register_counter(&registry, "watch_reconnects_total", "Re-established watch subscriptions"),
            registry,
        }
    }

    /// Registry holding this watcher's counters, for exposition.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn record_event(&self) {
        self.events_seen.inc();
    }

    pub(crate) fn record_refresh(&self) {
        self.refreshes_published.inc();
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates_skipped.inc();
    }

    pub(crate) fn record_disruptive(&self) {
        self.disruptive_events.inc();
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.inc();
    }

    pub fn snapshot(&self) -> WatcherStatsSnapshot {
        WatcherStatsSnapshot {
            events_seen: self.events_seen.get(),
            refreshes_published: self.refreshes_published.get(),
            duplicates_skipped: self.duplicates_skipped.get(),
            disruptive_events: self.disruptive_events.get(),
            reconnects: self.reconnects.get(),
        }
    }
}

fn register_counter(
    registry: &Registry,
    name: &str,
    help: &str,
) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help).namespace("config_refresh"))
        .expect("metric can not be created");
    registry
        .register(Box::new(counter.clone()))
        .expect("collector can be registered");
    counter
}
