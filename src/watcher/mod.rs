//! Store change watcher
//!
//! One [`ChangeWatcher`] owns one watch subscription and one worker task.
//! The worker pulls event batches in store order, resolves the application
//! each changed key belongs to and publishes a refresh for it under the
//! [`DistributedLock`], so that the node that wins the lock is the only one
//! that publishes.
//!
//! When the subscription fails or ends, the worker re-subscribes from the
//! revision after the last one it handled (or after the revision the
//! subscription started at, when nothing arrived yet), backing off between
//! attempts. It stops when shut down or when the reconnect budget is spent.

mod stats;
pub use stats::*;


use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::utils::async_task::spawn_task;
use crate::BackoffPolicy;
use crate::ChangeEvent;
use crate::DistributedLock;
use crate::Error;
use crate::EventType;
use crate::KeyPrefixOrder;
use crate::LockOutcome;
use crate::RefreshPublisher;
use crate::Result;
use crate::StoreConnector;
use crate::StoreErrorKind;
use crate::WatchSubscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    NotStarted,
    Watching,
    Closed,
}

pub struct ChangeWatcher {
    inner: Arc<WatcherInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct WatcherInner {
    connector: Arc<StoreConnector>,
    lock: Arc<DistributedLock>,
    publisher: Arc<dyn RefreshPublisher>,
    order: KeyPrefixOrder,
    range_start: String,
    reconnect: BackoffPolicy,
    state: watch::Sender<WatcherState>,
    stats: WatcherStats,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("range_start", &self.inner.range_start)
            .field("state", &self.state())
            .finish()
    }
}

impl ChangeWatcher {
    /// Watcher over the whole store with the default reconnect policy.
    pub fn new(
        connector: Arc<StoreConnector>,
        lock: Arc<DistributedLock>,
        publisher: Arc<dyn RefreshPublisher>,
        order: KeyPrefixOrder,
    ) -> Self {
        let (state, _) = watch::channel(WatcherState::NotStarted);
        Self {
            inner: Arc::new(WatcherInner {
                connector,
                lock,
                publisher,
                order,
                range_start: String::new(),
                reconnect: BackoffPolicy::default(),
                state,
                stats: WatcherStats::default(),
                shutdown: CancellationToken::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Restricts the watch to keys starting with `range_start`.
    pub fn with_range_start(
        self,
        range_start: impl Into<String>,
    ) -> Self {
        self.configure(|inner| inner.range_start = range_start.into())
    }

    pub fn with_reconnect_policy(
        self,
        reconnect: BackoffPolicy,
    ) -> Self {
        self.configure(|inner| inner.reconnect = reconnect)
    }

    /// Stops the watcher when `shutdown` is cancelled. Shutting the watcher
    /// down does not cancel `shutdown` itself.
    pub fn with_shutdown(
        self,
        shutdown: CancellationToken,
    ) -> Self {
        self.configure(|inner| inner.shutdown = shutdown.child_token())
    }

    fn configure(
        mut self,
        f: impl FnOnce(&mut WatcherInner),
    ) -> Self {
        // only reachable before start(), while the worker holds no reference
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            f(inner);
        }
        self
    }

    pub fn state(&self) -> WatcherState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WatcherState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> WatcherStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Prometheus registry holding this watcher's counters.
    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.inner.stats.registry()
    }

    /// Opens the subscription and starts the worker.
    ///
    /// Only the first successful call does anything; later calls are logged
    /// and ignored. If the subscription cannot be opened the watcher stays
    /// `NotStarted` and the error is returned.
    pub async fn start(&self) -> Result<()> {
        if self.state() != WatcherState::NotStarted {
            self.log_ignored_start();
            return Ok(());
        }

        let subscription = self.inner.connector.watch(&self.inner.range_start).await?;

        let started = self.inner.state.send_if_modified(|state| {
            if *state == WatcherState::NotStarted {
                *state = WatcherState::Watching;
                true
            } else {
                false
            }
        });
        if !started {
            self.log_ignored_start();
            return Ok(());
        }

        info!(range_start = %self.inner.range_start, "change watcher started");
        let inner = self.inner.clone();
        let handle = spawn_task("change-watcher", move || inner.run(subscription));
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Stops the worker and waits for it to exit.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                error!(error = %e, "change watcher worker panicked");
            }
        }
        self.inner.state.send_replace(WatcherState::Closed);
    }

    fn log_ignored_start(&self) {
        match self.state() {
            WatcherState::Closed => warn!("change watcher is closed and cannot be restarted"),
            _ => info!("change watcher already watching, start ignored"),
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl WatcherInner {
    async fn run(
        self: Arc<Self>,
        mut subscription: WatchSubscription,
    ) -> Result<()> {
        let mut failures = 0usize;
        // newest revision nothing at or below which still needs handling
        let mut last_revision = Some(subscription.start_after());

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Ok(()),
                next = subscription.next_batch() => next,
            };

            let reason = match next {
                Some(Ok(batch)) => {
                    failures = 0;
                    for event in batch {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        let revision = event.revision;
                        self.handle_event(event).await;
                        last_revision = Some(revision);
                    }
                    continue;
                }
                Some(Err(e)) => {
                    warn!(error = %e, ?last_revision, "watch subscription failed");
                    if e.kind == StoreErrorKind::Compacted {
                        warn!(?last_revision, "resume revision compacted, resuming from the current revision");
                        last_revision = None;
                    }
                    e.to_string()
                }
                None => {
                    if self.shutdown.is_cancelled() {
                        break Ok(());
                    }
                    warn!(?last_revision, "watch subscription ended");
                    "subscription ended".to_string()
                }
            };

            subscription.close();
            match self.resubscribe(&mut failures, last_revision.map(|r| r + 1)).await {
                Ok(Some(next)) => {
                    last_revision.get_or_insert(next.start_after());
                    subscription = next;
                }
                Ok(None) => break Ok(()),
                Err(e) => {
                    error!(attempts = failures, last_failure = %reason, "watch reconnect budget exhausted, closing watcher");
                    break Err(e);
                }
            }
        };

        self.state.send_replace(WatcherState::Closed);
        info!(stats = ?self.stats.snapshot(), "change watcher closed");
        result
    }

    /// `Ok(None)` when shutdown interrupted the attempt.
    async fn resubscribe(
        &self,
        failures: &mut usize,
        resume_from: Option<i64>,
    ) -> Result<Option<WatchSubscription>> {
        loop {
            if !self.reconnect.allows(*failures) {
                return Err(Error::Fatal(format!(
                    "could not re-establish watch on `{}` after {} attempts",
                    self.range_start, failures
                )));
            }
            let delay = self.reconnect.delay_for(*failures);
            *failures += 1;

            debug!(attempt = *failures, ?delay, ?resume_from, "re-subscribing after backoff");
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(None),
                _ = sleep(delay) => {}
            }

            let attempt = timeout(
                self.reconnect.timeout(),
                self.connector.watch_from(&self.range_start, resume_from),
            );
            match attempt.await {
                Err(_) => warn!(attempt = *failures, timeout = ?self.reconnect.timeout(), "re-subscribe attempt timed out"),
                Ok(Ok(subscription)) => {
                    self.stats.record_reconnect();
                    info!(attempt = *failures, ?resume_from, "watch subscription re-established");
                    return Ok(Some(subscription));
                }
                Ok(Err(Error::Store(e))) if e.is_interrupted() => return Ok(None),
                Ok(Err(e)) => warn!(attempt = *failures, error = %e, "re-subscribe attempt failed"),
            }
        }
    }

    async fn handle_event(
        &self,
        event: ChangeEvent,
    ) {
        self.stats.record_event();

        match event.event_type {
            EventType::Put => {
                let application = self.order.extract_application_name(&event.key);
                let ticket = self.lock.ticket(&event.key, &event.value);
                debug!(
                    key = %event.key,
                    revision = event.revision,
                    %application,
                    lock_name = %ticket.lock_name,
                    "key modified"
                );

                let publisher = self.publisher.as_ref();
                let destination = application.as_str();
                let outcome = self
                    .lock
                    .process_ticket(&ticket, &self.shutdown, move || publisher.publish(destination))
                    .await;

                match outcome {
                    LockOutcome::Acquired | LockOutcome::Bypassed | LockOutcome::FailedOpen => {
                        self.stats.record_refresh();
                        info!(%application, key = %event.key, ?outcome, "refresh published");
                    }
                    LockOutcome::Skipped => {
                        self.stats.record_duplicate();
                        debug!(%application, key = %event.key, "refresh handled by another node");
                    }
                    LockOutcome::Cancelled => {
                        debug!(%application, key = %event.key, "refresh abandoned on shutdown");
                    }
                }
            }
            EventType::Delete | EventType::Unknown => {
                self.stats.record_disruptive();
                warn!(
                    key = %event.key,
                    revision = event.revision,
                    event_type = ?event.event_type,
                    "disruptive store event, no refresh published"
                );
            }
        }
    }
}
