use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use etcd_client::Client;
use etcd_client::GetOptions;
use etcd_client::SortOrder;
use etcd_client::SortTarget;
use etcd_client::WatchOptions;
use etcd_client::WatchStream;
use etcd_client::Watcher;
use futures::stream;
use futures::StreamExt;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::BackendWatch;
use super::ChangeEvent;
use super::ConnectOptions;
use super::EventBatch;
use super::EventType;
use super::KeyValueEntry;
use super::KvBackend;
use crate::constants::FULL_RANGE_KEY;
use crate::BackendError;
use crate::StoreErrorKind;

// gRPC status codes that mean the member went away rather than refused the request
const GRPC_CANCELLED: i32 = 1;
const GRPC_DEADLINE_EXCEEDED: i32 = 4;
const GRPC_UNAVAILABLE: i32 = 14;

/// [`KvBackend`] over an etcd v3 cluster.
#[derive(Default)]
pub struct EtcdBackend {
    client: ArcSwapOption<Client>,
}

impl std::fmt::Debug for EtcdBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EtcdBackend")
            .field("connected", &self.client.load().is_some())
            .finish()
    }
}

impl EtcdBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> std::result::Result<Client, BackendError> {
        match self.client.load_full() {
            Some(client) => Ok(Client::clone(&client)),
            None => Err(BackendError::new(
                StoreErrorKind::NotConnected,
                "etcd client not initialized",
            )),
        }
    }
}

/// `""` selects the whole keyspace; anything else is a prefix.
fn range_get_options(prefix: &str) -> (String, GetOptions) {
    let options = GetOptions::new().with_sort(SortTarget::Key, SortOrder::Descend);
    if prefix.is_empty() {
        (FULL_RANGE_KEY.to_string(), options.with_from_key())
    } else {
        (prefix.to_string(), options.with_prefix())
    }
}

fn range_watch_options(
    range_start: &str,
    start_revision: Option<i64>,
) -> (String, WatchOptions) {
    let mut options = WatchOptions::new();
    if let Some(revision) = start_revision {
        options = options.with_start_revision(revision);
    }
    if range_start.is_empty() {
        (FULL_RANGE_KEY.to_string(), options.with_from_key())
    } else {
        (range_start.to_string(), options.with_prefix())
    }
}

fn classify(err: etcd_client::Error) -> BackendError {
    let kind = match &err {
        etcd_client::Error::GRpcStatus(status) => match status.code() as i32 {
            GRPC_CANCELLED | GRPC_DEADLINE_EXCEEDED | GRPC_UNAVAILABLE => StoreErrorKind::Connection,
            _ => StoreErrorKind::Execution,
        },
        etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_) => StoreErrorKind::Connection,
        _ => StoreErrorKind::Execution,
    };
    BackendError::new(kind, err)
}

fn to_entry(kv: &etcd_client::KeyValue) -> std::result::Result<KeyValueEntry, BackendError> {
    Ok(KeyValueEntry {
        key: kv.key_str().map_err(classify)?.to_string(),
        value: kv.value_str().map_err(classify)?.to_string(),
        revision: kv.mod_revision(),
    })
}

fn to_change_event(
    event: &etcd_client::Event,
    header_revision: i64,
) -> ChangeEvent {
    let Some(kv) = event.kv() else {
        return unknown_event(header_revision);
    };
    let (Ok(key), value) = (kv.key_str(), kv.value_str().unwrap_or_default()) else {
        return unknown_event(kv.mod_revision());
    };

    match event.event_type() {
        etcd_client::EventType::Put => ChangeEvent::put(key, value, kv.mod_revision()),
        etcd_client::EventType::Delete => ChangeEvent::delete(key, kv.mod_revision()),
    }
}

fn unknown_event(revision: i64) -> ChangeEvent {
    ChangeEvent {
        event_type: EventType::Unknown,
        key: String::new(),
        value: String::new(),
        revision,
    }
}

/// Store revision as seen by a count-only read of the null key.
async fn current_revision(client: &mut Client) -> std::result::Result<i64, BackendError> {
    let response = client
        .get(FULL_RANGE_KEY, Some(GetOptions::new().with_count_only()))
        .await
        .map_err(classify)?;
    response
        .header()
        .map(|h| h.revision())
        .ok_or_else(|| BackendError::execution("range response without header"))
}

/// Pulls responses until one carries events. Progress and creation
/// notifications carry none and are skipped.
async fn next_batch(
    watcher: &Watcher,
    stream: &mut WatchStream,
) -> Option<std::result::Result<EventBatch, BackendError>> {
    loop {
        let response = match stream.message().await {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(e) => return Some(Err(classify(e))),
        };

        if response.compact_revision() > 0 {
            warn!(
                watch_id = watcher.watch_id(),
                compact_revision = response.compact_revision(),
                "watch start revision was compacted"
            );
            return Some(Err(BackendError::new(
                StoreErrorKind::Compacted,
                format!("revision compacted at {}", response.compact_revision()),
            )));
        }
        if response.canceled() {
            return Some(Err(BackendError::connection(format!(
                "watch canceled by server: {}",
                response.cancel_reason()
            ))));
        }

        let header_revision = response.header().map(|h| h.revision()).unwrap_or_default();
        let batch: EventBatch = response
            .events()
            .iter()
            .map(|event| to_change_event(event, header_revision))
            .collect();
        if batch.is_empty() {
            trace!(watch_id = watcher.watch_id(), "watch response without events");
            continue;
        }
        return Some(Ok(batch));
    }
}

#[async_trait]
impl KvBackend for EtcdBackend {
    async fn connect(
        &self,
        endpoints: &[String],
        options: &ConnectOptions,
    ) -> std::result::Result<(), BackendError> {
        let mut connect_options = etcd_client::ConnectOptions::new();
        if let (Some(user), Some(password)) = (&options.username, &options.password) {
            connect_options = connect_options.with_user(user.clone(), password.clone());
        }
        if let (Some(time), Some(timeout)) = (options.keep_alive_time, options.keep_alive_timeout) {
            connect_options = connect_options.with_keep_alive(time, timeout);
        }

        let client = Client::connect(endpoints, Some(connect_options))
            .await
            .map_err(BackendError::connection)?;
        self.client.store(Some(Arc::new(client)));
        debug!(?endpoints, "etcd client initialized");
        Ok(())
    }

    async fn range(
        &self,
        prefix: &str,
    ) -> std::result::Result<Vec<KeyValueEntry>, BackendError> {
        let mut client = self.client()?;
        let (key, options) = range_get_options(prefix);
        let response = client.get(key, Some(options)).await.map_err(classify)?;
        response.kvs().iter().map(to_entry).collect()
    }

    async fn get(
        &self,
        key: &str,
    ) -> std::result::Result<Option<KeyValueEntry>, BackendError> {
        let mut client = self.client()?;
        let response = client.get(key, None).await.map_err(classify)?;
        response.kvs().first().map(to_entry).transpose()
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> std::result::Result<i64, BackendError> {
        let mut client = self.client()?;
        let response = client.put(key, value, None).await.map_err(classify)?;
        Ok(response.header().map(|h| h.revision()).unwrap_or_default())
    }

    async fn watch(
        &self,
        range_start: &str,
        start_revision: Option<i64>,
    ) -> std::result::Result<BackendWatch, BackendError> {
        let mut client = self.client()?;
        // pin the start so events between this read and watch creation are not lost
        let start_revision = match start_revision {
            Some(revision) => revision,
            None => current_revision(&mut client).await? + 1,
        };
        let (key, options) = range_watch_options(range_start, Some(start_revision));
        let (watcher, watch_stream) = client.watch(key, Some(options)).await.map_err(classify)?;
        debug!(watch_id = watcher.watch_id(), range_start, "etcd watch created");

        // the watcher handle must outlive the stream or the server side watch is dropped
        let events = stream::unfold((watcher, watch_stream), |(watcher, mut watch_stream)| async move {
            let item = next_batch(&watcher, &mut watch_stream).await?;
            Some((item, (watcher, watch_stream)))
        });
        Ok(BackendWatch {
            start_after: start_revision - 1,
            events: events.boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prefix_reads_from_the_null_key() {
        let (key, _) = range_get_options("");
        assert_eq!(key, "\0");
        let (key, _) = range_watch_options("", Some(7));
        assert_eq!(key, "\0");
    }

    #[test]
    fn non_empty_prefix_is_kept_verbatim() {
        let (key, _) = range_get_options("orders.");
        assert_eq!(key, "orders.");
        let (key, _) = range_watch_options("orders.", None);
        assert_eq!(key, "orders.");
    }

    #[tokio::test]
    async fn calls_before_connect_report_not_connected() {
        let backend = EtcdBackend::new();
        let err = backend.range("").await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::NotConnected);
        let err = backend.watch("", None).await.err().unwrap();
        assert_eq!(err.kind, StoreErrorKind::NotConnected);
    }
}
