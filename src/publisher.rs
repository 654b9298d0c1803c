//! Refresh notification sink
//!
//! The watcher hands every deduplicated refresh to a [`RefreshPublisher`].
//! [`BusRefreshPublisher`] fans the request out as a [`RefreshEvent`] on an
//! in-process broadcast channel; whatever carries events to client
//! applications subscribes to it.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::broadcast;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::BusConfig;

/// Receives "refresh application X" requests. Fire-and-forget: no ordering
/// across application ids and no acknowledgement.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RefreshPublisher: Send + Sync + 'static {
    async fn publish(
        &self,
        application_id: &str,
    );
}

/// Refresh request as seen by bus subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshEvent {
    /// Bus id of the node that published the event
    pub origin_service: String,
    /// Application to refresh; `*` addresses every application
    pub destination: String,
}

#[derive(Debug)]
pub struct BusRefreshPublisher {
    bus_id: String,
    sender: broadcast::Sender<RefreshEvent>,
}

impl BusRefreshPublisher {
    pub fn new(
        bus_id: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            bus_id: bus_id.into(),
            sender,
        }
    }

    pub fn from_config(config: &BusConfig) -> Self {
        Self::new(config.bus_id.clone(), config.channel_capacity)
    }

    pub fn bus_id(&self) -> &str {
        &self.bus_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl RefreshPublisher for BusRefreshPublisher {
    async fn publish(
        &self,
        application_id: &str,
    ) {
        let event = RefreshEvent {
            origin_service: self.bus_id.clone(),
            destination: application_id.to_string(),
        };
        match self.sender.send(event) {
            Ok(receivers) => {
                info!(destination = application_id, origin = %self.bus_id, "refresh event published");
                debug!(receivers, "refresh event delivered");
            }
            Err(_) => warn!(
                destination = application_id,
                "refresh event dropped, no bus subscribers"
            ),
        }
    }
}
