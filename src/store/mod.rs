//! Key-value store access
//!
//! [`StoreConnector`] is the only type the rest of the crate talks to. It
//! wraps a [`KvBackend`] (etcd in production, [`MemoryStore`] when embedded
//! or under test) and adds the connection guard, request timeouts, the
//! empty-on-interrupt read policy and endpoint context on errors.

mod connector;
mod etcd;
mod memory;
mod properties;
mod subscription;

pub use connector::*;
pub use etcd::*;
pub use memory::*;
pub use properties::*;
pub use subscription::*;


use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;

use crate::BackendError;

/// Read-only snapshot of one stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueEntry {
    pub key: String,
    pub value: String,
    /// Store revision of the last modification of this key
    pub revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
    /// Event the store emitted but this crate cannot classify
    Unknown,
}

/// One mutation observed through a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub key: String,
    pub value: String,
    pub revision: i64,
}

impl ChangeEvent {
    pub fn put(
        key: impl Into<String>,
        value: impl Into<String>,
        revision: i64,
    ) -> Self {
        Self {
            event_type: EventType::Put,
            key: key.into(),
            value: value.into(),
            revision,
        }
    }

    pub fn delete(
        key: impl Into<String>,
        revision: i64,
    ) -> Self {
        Self {
            event_type: EventType::Delete,
            key: key.into(),
            value: String::new(),
            revision,
        }
    }
}

/// Events delivered together by one watch response, in store order.
pub type EventBatch = Vec<ChangeEvent>;

/// Infinite stream of event batches produced by a backend watch.
pub type EventStream = BoxStream<'static, std::result::Result<EventBatch, BackendError>>;

/// Watch opened by a backend.
pub struct BackendWatch {
    /// Store revision the watch starts after: every event with a greater
    /// revision is delivered, nothing at or below it is.
    pub start_after: i64,
    pub events: EventStream,
}

impl std::fmt::Debug for BackendWatch {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BackendWatch").field("start_after", &self.start_after).finish()
    }
}

/// Optional connection parameters; `None` fields are left out of the
/// underlying client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_time: Option<Duration>,
    pub keep_alive_timeout: Option<Duration>,
}

/// Capabilities this crate needs from a key-value store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KvBackend: Send + Sync + 'static {
    /// Opens the client against `endpoints`.
    async fn connect(
        &self,
        endpoints: &[String],
        options: &ConnectOptions,
    ) -> std::result::Result<(), BackendError>;

    /// All keys starting with `prefix` (everything for `""`), sorted by key
    /// descending.
    async fn range(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<KeyValueEntry>, BackendError>;

    async fn get(
        &self,
        key: &str,
    ) -> std::result::Result<Option<KeyValueEntry>, BackendError>;

    /// Stores `value` under `key` and returns the new store revision.
    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> std::result::Result<i64, BackendError>;

    /// Subscribes to every key starting with `range_start` (everything for
    /// `""`), replaying from `start_revision` or, without one, from the
    /// revision after the current one.
    async fn watch(
        &self,
        range_start: &str,
        start_revision: Option<i64>,
    ) -> std::result::Result<BackendWatch, BackendError>;
}
