use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::constants::REDIS_CONNECTION_PREFIX;
use crate::Error;
use crate::Result;

/// Distributed lock settings
///
/// With `distributed_lock_enabled = false` every node publishes every refresh
/// on its own; this is the right choice for a single config node.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockConfig {
    /// Lock service addresses without scheme; more than one selects cluster mode
    #[serde(default = "default_lock_urls")]
    pub urls: Vec<String>,

    #[serde(default = "default_lock_enabled")]
    pub distributed_lock_enabled: bool,

    /// How long a node waits for the lock before assuming another node
    /// handles the change (seconds)
    #[serde(default = "default_lock_wait_time")]
    pub lock_wait_time: u64,

    /// How long an acquired lock lives before it expires on its own (seconds)
    #[serde(default = "default_lock_lease_time")]
    pub lock_lease_time: u64,

    /// Pause between acquisition attempts inside the wait window (milliseconds)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Namespace prepended to every lock name, joined with `:`
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            urls: default_lock_urls(),
            distributed_lock_enabled: default_lock_enabled(),
            lock_wait_time: default_lock_wait_time(),
            lock_lease_time: default_lock_lease_time(),
            retry_interval_ms: default_retry_interval_ms(),
            key_prefix: String::new(),
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.distributed_lock_enabled {
            return Ok(());
        }

        if self.urls.is_empty() {
            return Err(Error::InvalidConfig(
                "lock.urls must name at least one lock server when lock.distributed_lock_enabled is set".into(),
            ));
        }

        if self.lock_lease_time == 0 {
            return Err(Error::InvalidConfig("lock.lock_lease_time must be > 0".into()));
        }

        // Allowed, but a node still waiting when the lease expires will
        // acquire it and publish the same refresh a second time.
        if self.lock_wait_time >= self.lock_lease_time {
            warn!(
                "lock.lock_wait_time {}s is not shorter than lock.lock_lease_time {}s; \
                 duplicate refreshes are possible",
                self.lock_wait_time, self.lock_lease_time
            );
        }

        if self.retry_interval_ms == 0 {
            return Err(Error::InvalidConfig("lock.retry_interval_ms cannot be 0".into()));
        }

        Ok(())
    }

    pub fn urls_with_redis_prefix(&self) -> Vec<String> {
        self.urls
            .iter()
            .map(|u| format!("{}{}", REDIS_CONNECTION_PREFIX, u))
            .collect()
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_wait_time)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_lease_time)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

fn default_lock_enabled() -> bool {
    true
}
fn default_lock_wait_time() -> u64 {
    4
}
fn default_lock_lease_time() -> u64 {
    10
}
fn default_retry_interval_ms() -> u64 {
    50
}
fn default_lock_urls() -> Vec<String> {
    vec!["127.0.0.1:6379".to_string()]
}
