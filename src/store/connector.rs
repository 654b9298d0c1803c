use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ConnectOptions;
use super::KvBackend;
use super::Properties;
use super::WatchSubscription;
use crate::utils::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackendError;
use crate::BackoffPolicy;
use crate::KvStoreError;
use crate::Result;
use crate::StoreErrorKind;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection to the shared key-value store.
///
/// The endpoint set is fixed at construction. Every read and watch requires a
/// prior successful [`connect`](Self::connect).
///
/// Interrupted reads (the connector's shutdown token fired while the request
/// was pending) are not errors: [`get_all`](Self::get_all) yields an empty
/// [`Properties`] and [`get_one`](Self::get_one) yields `None`.
pub struct StoreConnector {
    endpoints: Vec<String>,
    backend: Arc<dyn KvBackend>,
    connected: AtomicBool,
    connect_lock: Mutex<()>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for StoreConnector {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("StoreConnector")
            .field("endpoints", &self.endpoints)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl StoreConnector {
    pub fn new(
        endpoints: Vec<String>,
        backend: Arc<dyn KvBackend>,
    ) -> Self {
        Self {
            endpoints,
            backend,
            connected: AtomicBool::new(false),
            connect_lock: Mutex::new(()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_request_timeout(
        mut self,
        request_timeout: Duration,
    ) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Ties pending reads and open subscriptions to an external shutdown token.
    pub fn with_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Interrupts pending reads and closes every subscription opened through
    /// this connector.
    pub fn interrupt(&self) {
        self.shutdown.cancel();
    }

    /// Connects to the endpoint set. Calling it again after success is a no-op.
    pub async fn connect(
        &self,
        options: ConnectOptions,
    ) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            debug!(endpoints = ?self.endpoints, "store connector already connected");
            return Ok(());
        }

        self.guarded(self.backend.connect(&self.endpoints, &options))
            .await
            .map_err(|e| {
                error!(endpoints = ?self.endpoints, error = %e, "failed to connect to store");
                KvStoreError::from_backend(e, &self.endpoints)
            })?;

        self.connected.store(true, Ordering::Release);
        info!(
            endpoints = ?self.endpoints,
            authenticated = options.username.is_some(),
            keep_alive = options.keep_alive_time.is_some(),
            "connected to store"
        );
        Ok(())
    }

    /// [`connect`](Self::connect), retried with backoff under `policy`.
    pub async fn connect_with_retry(
        &self,
        options: ConnectOptions,
        policy: BackoffPolicy,
    ) -> Result<()> {
        task_with_timeout_and_exponential_backoff(|| self.connect(options.clone()), policy).await
    }

    /// Reads every key under `prefix`, with the prefix stripped from the
    /// returned keys.
    pub async fn get_all(
        &self,
        prefix: &str,
    ) -> Result<Properties> {
        self.ensure_connected()?;

        match self.guarded(self.backend.range(prefix)).await {
            Ok(entries) => {
                if entries.is_empty() {
                    info!(prefix, "store contains no data yet");
                }
                Ok(Properties::from_entries(entries.into_iter().map(|entry| {
                    let key = match entry.key.strip_prefix(prefix) {
                        Some(stripped) => stripped.to_string(),
                        None => entry.key,
                    };
                    (key, entry.value)
                })))
            }
            Err(e) if e.kind == StoreErrorKind::Interrupted => {
                warn!(prefix, "prefix read interrupted, returning no data");
                Ok(Properties::default())
            }
            Err(e) => {
                error!(prefix, endpoints = ?self.endpoints, error = %e, "prefix read failed");
                Err(KvStoreError::from_backend(e, &self.endpoints).into())
            }
        }
    }

    pub async fn get_one(
        &self,
        key: &str,
    ) -> Result<Option<String>> {
        self.ensure_connected()?;

        match self.guarded(self.backend.get(key)).await {
            Ok(entry) => Ok(entry.map(|e| e.value)),
            Err(e) if e.kind == StoreErrorKind::Interrupted => {
                warn!(key, "point read interrupted, returning no data");
                Ok(None)
            }
            Err(e) => {
                error!(key, endpoints = ?self.endpoints, error = %e, "point read failed");
                Err(KvStoreError::from_backend(e, &self.endpoints).into())
            }
        }
    }

    /// Stores one key and returns the resulting store revision.
    pub async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> Result<i64> {
        self.ensure_connected()?;
        info!(key, value, "adding key to store");

        self.guarded(self.backend.put(key, value))
            .await
            .map_err(|e| KvStoreError::from_backend(e, &self.endpoints).into())
    }

    /// Opens a subscription on every key starting with `range_start`.
    pub async fn watch(
        &self,
        range_start: &str,
    ) -> Result<WatchSubscription> {
        self.watch_from(range_start, None).await
    }

    /// Opens a subscription that replays events from `start_revision` on.
    pub async fn watch_from(
        &self,
        range_start: &str,
        start_revision: Option<i64>,
    ) -> Result<WatchSubscription> {
        self.ensure_connected()?;

        let watch = self
            .guarded(self.backend.watch(range_start, start_revision))
            .await
            .map_err(|e| KvStoreError::from_backend(e, &self.endpoints))?;

        debug!(range_start, ?start_revision, start_after = watch.start_after, "watch subscription opened");
        Ok(WatchSubscription::new(
            range_start.to_string(),
            watch,
            self.shutdown.child_token(),
            self.endpoints.clone(),
        ))
    }

    fn ensure_connected(&self) -> std::result::Result<(), KvStoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(KvStoreError::not_connected(&self.endpoints))
        }
    }

    /// Bounds a backend call by the request timeout and the shutdown token.
    async fn guarded<T, F>(
        &self,
        fut: F,
    ) -> std::result::Result<T, BackendError>
    where
        F: Future<Output = std::result::Result<T, BackendError>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(BackendError::interrupted()),
            result = timeout(self.request_timeout, fut) => match result {
                Ok(r) => r,
                Err(elapsed) => Err(BackendError::connection(elapsed)),
            },
        }
    }
}
