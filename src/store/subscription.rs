use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BackendWatch;
use super::EventBatch;
use super::EventStream;
use crate::KvStoreError;

/// Live watch on a key range.
///
/// Batches are pulled one at a time by a single consumer. Once the stream
/// ends or the subscription is closed it never yields again; open a new
/// subscription instead. Dropping the subscription releases the underlying
/// watch.
pub struct WatchSubscription {
    range_start: String,
    stream: Option<EventStream>,
    cancel: CancellationToken,
    endpoints: Vec<String>,
    start_after: i64,
    last_revision: Option<i64>,
}

impl WatchSubscription {
    pub(crate) fn new(
        range_start: String,
        watch: BackendWatch,
        cancel: CancellationToken,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            range_start,
            stream: Some(watch.events),
            cancel,
            endpoints,
            start_after: watch.start_after,
            last_revision: None,
        }
    }

    /// Waits for the next batch.
    ///
    /// Returns `None` once the stream has ended or the subscription was
    /// closed, including while this call was waiting.
    pub async fn next_batch(&mut self) -> Option<std::result::Result<EventBatch, KvStoreError>> {
        let stream = self.stream.as_mut()?;

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = stream.next() => item,
        };

        match next {
            Some(Ok(batch)) => {
                if let Some(last) = batch.last() {
                    self.last_revision = Some(last.revision);
                }
                Some(Ok(batch))
            }
            Some(Err(e)) => Some(Err(KvStoreError::from_backend(e, &self.endpoints))),
            None => {
                self.release();
                None
            }
        }
    }

    pub fn range_start(&self) -> &str {
        &self.range_start
    }

    /// Store revision this subscription started after. A replacement
    /// subscription that resumes from the revision after this one misses
    /// nothing, even when no event was delivered.
    pub fn start_after(&self) -> i64 {
        self.start_after
    }

    /// Revision of the last event delivered through this subscription.
    pub fn last_revision(&self) -> Option<i64> {
        self.last_revision
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Token that closes this subscription when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.cancel.cancel();
        if self.stream.take().is_some() {
            debug!(range_start = %self.range_start, "watch subscription released");
        }
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
