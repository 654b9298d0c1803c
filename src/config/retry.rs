use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.max_retries == 0
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(
        &self,
        attempts: usize,
    ) -> bool {
        self.is_unlimited() || attempts < self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Exponential delay for the given 0-based attempt, capped at
    /// `max_delay_ms`, plus up to 10% jitter.
    pub fn delay_for(
        &self,
        attempt: usize,
    ) -> Duration {
        let exp = attempt.min(20) as u32;
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        let capped = raw.min(self.max_delay_ms);
        let jitter = if capped >= 10 {
            rand::thread_rng().gen_range(0..=capped / 10)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Divide strategies by the operation they protect
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    // Initial store connection at startup
    #[serde(default = "default_connect_policy")]
    pub connect: BackoffPolicy,

    // Re-subscribing after the watch stream breaks
    #[serde(default = "default_watch_policy")]
    pub watch: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            connect: default_connect_policy(),
            watch: default_watch_policy(),
        }
    }
}

fn default_connect_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 5,
        timeout_ms: 3000,
        base_delay_ms: 500,
        max_delay_ms: 10000,
    }
}
fn default_watch_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 3000,
        base_delay_ms: 500,
        max_delay_ms: 30000,
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    1000
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
