//! Helpers shared by the unit tests of every module.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::RefreshPublisher;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

/// Publisher that records every application id it was asked to refresh.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<String>>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<String> {
        self.published.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait::async_trait]
impl RefreshPublisher for RecordingPublisher {
    async fn publish(
        &self,
        application_id: &str,
    ) {
        self.published.lock().push(application_id.to_string());
    }
}
