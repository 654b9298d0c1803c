//! Error hierarchy for configuration change propagation
//!
//! Failures are grouped by the subsystem that produced them. Store and lock
//! failures carry a kind tag plus the underlying cause, so callers dispatch on
//! [`StoreErrorKind`] / [`LockErrorKind`] instead of on concrete types.

use std::fmt;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by store and lock errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key-value store failures (connect, read, watch)
    #[error(transparent)]
    Store(#[from] KvStoreError),

    /// Lock service failures
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Configuration source could not be loaded or deserialized
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration values violate a startup rule
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// A retried task did not finish within its per-attempt timeout
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// A read or watch was issued before `connect()`
    NotConnected,
    /// Store unreachable at connect time or mid-operation
    Connection,
    /// A pending read or watch wait was interrupted by shutdown
    Interrupted,
    /// The store reported a failure executing the request
    Execution,
    /// Requested watch revision was compacted away
    Compacted,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            StoreErrorKind::NotConnected => "not connected",
            StoreErrorKind::Connection => "connection failure",
            StoreErrorKind::Interrupted => "interrupted wait",
            StoreErrorKind::Execution => "execution failure",
            StoreErrorKind::Compacted => "revision compacted",
        };
        f.write_str(name)
    }
}

/// Failure raised by a [`crate::KvBackend`] before endpoint context is attached.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {cause}")]
pub struct BackendError {
    pub kind: StoreErrorKind,
    #[source]
    pub cause: BoxError,
}

impl BackendError {
    pub fn new(
        kind: StoreErrorKind,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }

    pub fn connection(cause: impl Into<BoxError>) -> Self {
        Self::new(StoreErrorKind::Connection, cause)
    }

    pub fn execution(cause: impl Into<BoxError>) -> Self {
        Self::new(StoreErrorKind::Execution, cause)
    }

    pub fn interrupted() -> Self {
        Self::new(StoreErrorKind::Interrupted, "wait interrupted")
    }
}

/// Store failure surfaced to callers, tagged with the endpoint set it was
/// issued against.
#[derive(Debug, thiserror::Error)]
#[error("{kind} against store endpoints {endpoints:?}: {cause}")]
pub struct KvStoreError {
    pub kind: StoreErrorKind,
    pub endpoints: Vec<String>,
    #[source]
    pub cause: BoxError,
}

impl KvStoreError {
    pub(crate) fn from_backend(
        err: BackendError,
        endpoints: &[String],
    ) -> Self {
        Self {
            kind: err.kind,
            endpoints: endpoints.to_vec(),
            cause: err.cause,
        }
    }

    pub(crate) fn not_connected(endpoints: &[String]) -> Self {
        Self {
            kind: StoreErrorKind::NotConnected,
            endpoints: endpoints.to_vec(),
            cause: "call connect() before reading or watching keys".into(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.kind == StoreErrorKind::Interrupted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockErrorKind {
    /// Lock service could not be reached
    Unavailable,
    /// Lock service rejected or failed the command
    Backend,
    /// Lock service misconfiguration (no urls, bad url)
    InvalidOperation,
}

impl fmt::Display for LockErrorKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            LockErrorKind::Unavailable => "lock service unavailable",
            LockErrorKind::Backend => "lock service failure",
            LockErrorKind::InvalidOperation => "invalid lock operation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} for lock `{lock_name}`: {cause}")]
pub struct LockError {
    pub kind: LockErrorKind,
    pub lock_name: String,
    #[source]
    pub cause: BoxError,
}

impl LockError {
    pub fn new(
        kind: LockErrorKind,
        lock_name: impl Into<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            lock_name: lock_name.into(),
            cause: cause.into(),
        }
    }
}
