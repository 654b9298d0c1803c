//! Cluster-wide configuration refresh propagation.
//!
//! Every configuration node watches the shared key-value store. On a key
//! change each node resolves the client application the key belongs to and
//! tries to publish one refresh for it; a distributed lock named after the
//! change makes sure only one node actually does.
//!
//! ```text
//! StoreConnector::watch ──► ChangeWatcher ──► KeyPrefixOrder (application)
//!                                 │
//!                                 └──► DistributedLock::process_ticket ──► RefreshPublisher
//! ```

mod config;
mod constants;
mod errors;
mod lock;
mod publisher;
mod repository;
mod store;
mod topology;
mod utils;
mod watcher;

pub use config::*;
pub use constants::KEY_DELIMITER;
pub use constants::LOCK_NAME_SEPARATOR;
pub use constants::WILDCARD_APPLICATION;
pub use errors::*;
pub use lock::*;
pub use publisher::*;
pub use repository::*;
pub use store::*;
pub use topology::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
