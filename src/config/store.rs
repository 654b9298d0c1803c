use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::HTTPS_PREFIX;
use crate::constants::HTTP_PREFIX;
use crate::ConnectOptions;
use crate::Error;
use crate::KeyPrefixOrder;
use crate::Result;

/// Key-value store connection and namespace settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Store node addresses without scheme, e.g. `10.0.0.1:2379`
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    /// Prefix every address with `https://` instead of `http://`
    #[serde(default)]
    pub https_enabled: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Keep-alive ping interval (seconds); omitted from the client when unset
    #[serde(default)]
    pub keep_alive_time_secs: Option<u64>,

    /// Keep-alive ping timeout (seconds); omitted from the client when unset
    #[serde(default)]
    pub keep_alive_timeout_secs: Option<u64>,

    /// Upper bound for a single synchronous read (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Which leading key segments hold application / profile / label
    #[serde(default)]
    pub key_prefix_order: KeyPrefixOrder,

    /// Key (prefix) the change watcher subscribes to; empty watches everything
    #[serde(default)]
    pub watch_range_start: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            https_enabled: false,
            username: None,
            password: None,
            keep_alive_time_secs: None,
            keep_alive_timeout_secs: None,
            request_timeout_ms: default_request_timeout_ms(),
            key_prefix_order: KeyPrefixOrder::default(),
            watch_range_start: String::new(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(Error::InvalidConfig(
                "store.urls must contain at least one endpoint".into(),
            ));
        }

        if self.urls.iter().any(|u| u.trim().is_empty()) {
            return Err(Error::InvalidConfig("store.urls contains a blank endpoint".into()));
        }

        if self.username.is_some() != self.password.is_some() {
            return Err(Error::InvalidConfig(
                "store.username and store.password must be set together".into(),
            ));
        }

        if self.keep_alive_time_secs.is_some() != self.keep_alive_timeout_secs.is_some() {
            return Err(Error::InvalidConfig(
                "store.keep_alive_time_secs and store.keep_alive_timeout_secs must be set together"
                    .into(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig("store.request_timeout_ms cannot be 0".into()));
        }

        Ok(())
    }

    /// Endpoints with the configured scheme applied.
    pub fn urls_with_http_prefix(&self) -> Vec<String> {
        let prefix = if self.https_enabled {
            HTTPS_PREFIX
        } else {
            HTTP_PREFIX
        };
        self.urls.iter().map(|u| format!("{}{}", prefix, u)).collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive_time: self.keep_alive_time_secs.map(Duration::from_secs),
            keep_alive_timeout: self.keep_alive_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn default_urls() -> Vec<String> {
    vec!["127.0.0.1:2379".to_string()]
}
fn default_request_timeout_ms() -> u64 {
    3000
}
