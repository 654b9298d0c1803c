//! Configuration management for a config-refresh node.
//!
//! Provides hierarchical configuration loading from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. `config/refresh` file (optional)
//! 3. Explicit override file passed by the caller
//! 4. File named by the `CONFIG_PATH` environment variable
//! 5. Environment variables `REFRESH__SECTION__FIELD` (highest priority)
//!

mod bus;
mod lock;
mod retry;
mod store;
pub use bus::*;
pub use lock::*;
pub use retry::*;
pub use store::*;

#[cfg(test)]
mod config_test;

//---
use std::env;
use std::path::PathBuf;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::ENV_PREFIX;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Key-value store connection and key namespace
    #[serde(default)]
    pub store: StoreConfig,
    /// Refresh deduplication lock
    #[serde(default)]
    pub lock: LockConfig,
    /// Retry policies for store connection and watch recovery
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Refresh event bus
    #[serde(default)]
    pub bus: BusConfig,
    /// Directory for rolling log files; logs go to stdout when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from multiple sources with priority:
    /// 1. Base config file
    /// 2. Caller supplied override file
    /// 3. `CONFIG_PATH` file
    /// 4. Environment variables
    ///
    /// # Arguments
    /// * `override_path` - Optional path to a node-specific configuration file
    ///
    /// # Returns
    /// Merged and validated configuration
    pub fn load(override_path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        // 1. Base config
        config = config.add_source(File::with_name("config/refresh").required(false));

        // 2. Overwrite with node config
        if let Some(path) = override_path {
            config = config.add_source(File::with_name(path).required(true));
        }

        // 3. Environment file overlay
        if let Ok(path) = env::var("CONFIG_PATH") {
            config = config.add_source(File::with_name(&path).required(true));
        }

        // 4. Environment variables (highest priority)
        config = config.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("store.urls")
                .with_list_parse_key("store.key_prefix_order")
                .with_list_parse_key("lock.urls"),
        );

        let settings: Settings = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates every section; called before any watch begins.
    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.lock.validate()?;
        self.bus.validate()?;

        if self.retry.connect.timeout_ms == 0 || self.retry.watch.timeout_ms == 0 {
            return Err(Error::InvalidConfig("retry timeout_ms cannot be 0".into()));
        }
        if self.retry.watch.base_delay_ms > self.retry.watch.max_delay_ms {
            return Err(Error::InvalidConfig(format!(
                "retry.watch.base_delay_ms {} exceeds max_delay_ms {}",
                self.retry.watch.base_delay_ms, self.retry.watch.max_delay_ms
            )));
        }
        Ok(())
    }
}
