//! In-process revisioned key-value store.
//!
//! Behaves like a single etcd member as far as this crate is concerned:
//! every mutation bumps a global revision, prefix reads are sorted by key
//! descending and watches can replay history from a revision. Used when the
//! refresh core is embedded without an external store, and by tests to run
//! several nodes against one shared keyspace.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BackendWatch;
use super::ChangeEvent;
use super::ConnectOptions;
use super::EventBatch;
use super::KeyValueEntry;
use super::KvBackend;
use crate::BackendError;
use crate::StoreErrorKind;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// Events kept for replay before the oldest revisions are compacted away.
pub const DEFAULT_HISTORY_RETENTION: usize = 10_000;

#[derive(Debug, Default)]
struct MemoryState {
    data: BTreeMap<String, (String, i64)>,
    revision: i64,
    history: VecDeque<ChangeEvent>,
    /// Highest revision no longer replayable
    compacted: i64,
}

impl MemoryState {
    fn compact(
        &mut self,
        revision: i64,
    ) {
        let revision = revision.min(self.revision);
        while self.history.front().is_some_and(|e| e.revision <= revision) {
            self.history.pop_front();
        }
        self.compacted = self.compacted.max(revision);
    }
}

/// Cheaply cloneable handle; clones share the same keyspace.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    events: broadcast::Sender<EventBatch>,
    reachable: Arc<AtomicBool>,
    watch_epoch: Arc<Mutex<CancellationToken>>,
    history_retention: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            events,
            reachable: Arc::new(AtomicBool::new(true)),
            watch_epoch: Arc::new(Mutex::new(CancellationToken::new())),
            history_retention: DEFAULT_HISTORY_RETENTION,
        }
    }

    /// Keeps at most `retention` events for replay.
    pub fn with_history_retention(
        mut self,
        retention: usize,
    ) -> Self {
        self.history_retention = retention.max(1);
        self
    }

    /// Current store revision (0 before the first mutation).
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    pub fn insert(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> i64 {
        self.insert_many(vec![(key.into(), value.into())])
    }

    /// Applies several puts under one revision, delivered as one watch batch.
    pub fn insert_many(
        &self,
        entries: Vec<(String, String)>,
    ) -> i64 {
        let mut state = self.state.lock();
        state.revision += 1;
        let revision = state.revision;

        let mut batch = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            state.data.insert(key.clone(), (value.clone(), revision));
            batch.push(ChangeEvent::put(key, value, revision));
        }
        self.publish(&mut state, batch);
        revision
    }

    /// Removes `key`; returns the deletion revision, or `None` when absent.
    pub fn remove(
        &self,
        key: &str,
    ) -> Option<i64> {
        let mut state = self.state.lock();
        state.data.remove(key)?;
        state.revision += 1;
        let revision = state.revision;
        self.publish(&mut state, vec![ChangeEvent::delete(key, revision)]);
        Some(revision)
    }

    /// Simulates the store going away (`false`) or coming back (`true`).
    /// Going away also breaks every open watch.
    pub fn set_reachable(
        &self,
        reachable: bool,
    ) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.break_watches();
        }
    }

    /// Discards history at or below `revision`. Watches asking to replay
    /// from a discarded revision fail with [`StoreErrorKind::Compacted`].
    pub fn compact(
        &self,
        revision: i64,
    ) {
        self.state.lock().compact(revision);
    }

    /// Highest revision that can no longer be replayed (0 when none).
    pub fn compacted_revision(&self) -> i64 {
        self.state.lock().compacted
    }

    /// Ends every open watch stream with a connection error.
    pub fn break_watches(&self) {
        let mut epoch = self.watch_epoch.lock();
        epoch.cancel();
        *epoch = CancellationToken::new();
    }

    fn publish(
        &self,
        state: &mut MemoryState,
        batch: EventBatch,
    ) {
        state.history.extend(batch.iter().cloned());
        if state.history.len() > self.history_retention {
            let overflow = state.history.len() - self.history_retention;
            if let Some(oldest_kept) = state.history.get(overflow) {
                // whole revisions only, so a replayed batch is never cut short
                let revision = oldest_kept.revision - 1;
                state.compact(revision);
            }
        }
        // no live watchers is fine
        let _ = self.events.send(batch);
    }

    fn check_reachable(&self) -> std::result::Result<(), BackendError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::connection("memory store unreachable"))
        }
    }
}

#[async_trait]
impl KvBackend for MemoryStore {
    async fn connect(
        &self,
        endpoints: &[String],
        _options: &ConnectOptions,
    ) -> std::result::Result<(), BackendError> {
        self.check_reachable()?;
        debug!(?endpoints, "memory store connected");
        Ok(())
    }

    async fn range(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<KeyValueEntry>, BackendError> {
        self.check_reachable()?;
        let state = self.state.lock();
        Ok(state
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (v, rev))| KeyValueEntry {
                key: k.clone(),
                value: v.clone(),
                revision: *rev,
            })
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>())
    }

    async fn get(
        &self,
        key: &str,
    ) -> std::result::Result<Option<KeyValueEntry>, BackendError> {
        self.check_reachable()?;
        let state = self.state.lock();
        Ok(state.data.get(key).map(|(v, rev)| KeyValueEntry {
            key: key.to_string(),
            value: v.clone(),
            revision: *rev,
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> std::result::Result<i64, BackendError> {
        self.check_reachable()?;
        Ok(self.insert(key, value))
    }

    async fn watch(
        &self,
        range_start: &str,
        start_revision: Option<i64>,
    ) -> std::result::Result<BackendWatch, BackendError> {
        self.check_reachable()?;

        // Subscribe and snapshot history under one lock so nothing falls in between.
        let (replay, receiver, floor) = {
            let state = self.state.lock();
            if let Some(from) = start_revision.filter(|from| *from <= state.compacted) {
                // etcd reports compaction on the watch stream, not on creation
                let compacted = state.compacted;
                let error = BackendError::new(
                    StoreErrorKind::Compacted,
                    format!("revision {from} compacted at {compacted}"),
                );
                return Ok(BackendWatch {
                    start_after: from - 1,
                    events: stream::once(async move { Err(error) }).boxed(),
                });
            }
            let receiver = self.events.subscribe();
            let replay: Vec<ChangeEvent> = match start_revision {
                Some(from) => state
                    .history
                    .iter()
                    .filter(|e| e.revision >= from && e.key.starts_with(range_start))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            (replay, receiver, state.revision)
        };
        let epoch = self.watch_epoch.lock().clone();
        let start_after = start_revision.map_or(floor, |from| from - 1);
        let live_floor = floor.max(start_after);

        let prefix = range_start.to_string();
        let replayed = stream::iter(group_by_revision(replay).into_iter().map(Ok));
        let live = BroadcastStream::new(receiver).filter_map(move |item| {
            let prefix = prefix.clone();
            async move {
                match item {
                    Ok(batch) => {
                        let matching: EventBatch = batch
                            .into_iter()
                            .filter(|e| e.revision > live_floor && e.key.starts_with(&prefix))
                            .collect();
                        (!matching.is_empty()).then_some(Ok(matching))
                    }
                    Err(lagged) => Some(Err(BackendError::execution(lagged))),
                }
            }
        });
        let broken = stream::once(async { Err(BackendError::connection("memory store watch broken")) });

        let events = replayed
            .chain(live)
            .take_until(epoch.cancelled_owned())
            .chain(broken)
            .boxed();
        Ok(BackendWatch { start_after, events })
    }
}

fn group_by_revision(events: Vec<ChangeEvent>) -> Vec<EventBatch> {
    let mut batches: Vec<EventBatch> = Vec::new();
    for event in events {
        match batches.last_mut() {
            Some(batch) if batch.last().map(|e| e.revision) == Some(event.revision) => batch.push(event),
            _ => batches.push(vec![event]),
        }
    }
    batches
}
