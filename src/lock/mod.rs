//! Cluster-wide deduplication of refresh actions
//!
//! Every node sees the same store change. The node that wins the lock named
//! after that change runs the refresh; the others give up once their wait
//! window closes. Locks are never released: the lease expiring is what lets
//! a later, genuinely new change through.

mod local;
mod redis;

pub use local::*;
pub use redis::*;


use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::constants::LOCK_NAME_SEPARATOR;
use crate::LockConfig;
use crate::LockError;

/// Named mutual exclusion with a self-expiring lease.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// One non-blocking attempt. `Ok(false)` means another owner holds an
    /// unexpired lease on `lock_name`.
    async fn try_acquire(
        &self,
        lock_name: &str,
        owner: &str,
        lease: Duration,
    ) -> std::result::Result<bool, LockError>;
}

/// Lock request for one observed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTicket {
    pub lock_name: String,
    pub wait_timeout: Duration,
    pub lease_timeout: Duration,
}

/// Lock name for a change: identical for repeated writes of the same value,
/// different for a new value.
pub fn lock_name_for(
    key: &str,
    value: &str,
) -> String {
    format!("{key}{LOCK_NAME_SEPARATOR}{value}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Deduplication disabled; the action ran unconditionally
    Bypassed,
    /// This node won the lock and ran the action
    Acquired,
    /// Another node held the lock for the whole wait window
    Skipped,
    /// The lock service failed on every attempt; the action ran anyway
    FailedOpen,
    /// Shutdown arrived before the lock was decided; the action did not run
    Cancelled,
}

impl LockOutcome {
    pub fn executed(&self) -> bool {
        matches!(self, LockOutcome::Bypassed | LockOutcome::Acquired | LockOutcome::FailedOpen)
    }
}

pub struct DistributedLock {
    enabled: bool,
    wait_timeout: Duration,
    lease_timeout: Duration,
    retry_interval: Duration,
    key_prefix: String,
    owner: String,
    service: Option<Arc<dyn LockService>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("enabled", &self.enabled)
            .field("wait_timeout", &self.wait_timeout)
            .field("lease_timeout", &self.lease_timeout)
            .field("owner", &self.owner)
            .finish()
    }
}

impl DistributedLock {
    /// Pass-through lock: every action runs.
    pub fn disabled() -> Self {
        let defaults = LockConfig::default();
        Self {
            enabled: false,
            wait_timeout: defaults.wait_timeout(),
            lease_timeout: defaults.lease_timeout(),
            retry_interval: defaults.retry_interval(),
            key_prefix: String::new(),
            owner: nanoid::nanoid!(),
            service: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Lock over `service`. With `distributed_lock_enabled = false` the
    /// service is never consulted.
    pub fn new(
        config: &LockConfig,
        service: Arc<dyn LockService>,
    ) -> Self {
        let owner = nanoid::nanoid!();
        info!(
            enabled = config.distributed_lock_enabled,
            wait_secs = config.lock_wait_time,
            lease_secs = config.lock_lease_time,
            %owner,
            "distributed lock configured"
        );
        Self {
            enabled: config.distributed_lock_enabled,
            wait_timeout: config.wait_timeout(),
            lease_timeout: config.lease_timeout(),
            retry_interval: config.retry_interval(),
            key_prefix: config.key_prefix.clone(),
            owner,
            service: Some(service),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.service.is_some()
    }

    /// Unique id this node presents to the lock service.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn ticket(
        &self,
        key: &str,
        value: &str,
    ) -> LockTicket {
        LockTicket {
            lock_name: lock_name_for(key, value),
            wait_timeout: self.wait_timeout,
            lease_timeout: self.lease_timeout,
        }
    }

    /// Runs `action` at most once cluster-wide per lease of `lock_name`.
    ///
    /// With the lock disabled `action` runs right away. Otherwise acquisition
    /// is retried until the wait timeout:
    ///
    /// * acquired: `action` runs and the lock is left to expire with its lease
    /// * held by another node on any attempt: `action` is skipped
    /// * every attempt failed at the lock service: `action` still runs
    ///   ([`LockOutcome::FailedOpen`]), so an outage of the lock service costs
    ///   duplicate refreshes instead of lost ones
    /// * shutdown while waiting: `action` is skipped
    pub async fn process_with_lock<F, Fut>(
        &self,
        lock_name: &str,
        action: F,
    ) -> LockOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let ticket = LockTicket {
            lock_name: lock_name.to_string(),
            wait_timeout: self.wait_timeout,
            lease_timeout: self.lease_timeout,
        };
        self.process_ticket(&ticket, &self.shutdown, action).await
    }

    /// Like [`process_with_lock`](Self::process_with_lock) with explicit
    /// timeouts and an extra cancellation source.
    pub async fn process_ticket<F, Fut>(
        &self,
        ticket: &LockTicket,
        cancel: &CancellationToken,
        action: F,
    ) -> LockOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let service = match (&self.service, self.enabled) {
            (Some(service), true) => service,
            _ => {
                action().await;
                return LockOutcome::Bypassed;
            }
        };

        let lock_name = self.qualified(&ticket.lock_name);
        let deadline = Instant::now() + ticket.wait_timeout;
        let mut held_elsewhere = false;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let budget = deadline.saturating_duration_since(Instant::now()).max(self.retry_interval);
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&lock_name),
                _ = self.shutdown.cancelled() => return self.cancelled(&lock_name),
                r = timeout(budget, service.try_acquire(&lock_name, &self.owner, ticket.lease_timeout)) => r,
            };

            match attempt {
                Ok(Ok(true)) => {
                    debug!(lock_name, attempts, "lock acquired");
                    action().await;
                    return LockOutcome::Acquired;
                }
                Ok(Ok(false)) => held_elsewhere = true,
                Ok(Err(e)) => warn!(lock_name, attempts, error = %e, "lock acquisition attempt failed"),
                Err(_) => warn!(lock_name, attempts, ?budget, "lock acquisition attempt timed out"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let pause = self.retry_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&lock_name),
                _ = self.shutdown.cancelled() => return self.cancelled(&lock_name),
                _ = sleep(pause) => {}
            }
        }

        if held_elsewhere {
            debug!(lock_name, attempts, "lock held by another node, skipping");
            LockOutcome::Skipped
        } else {
            error!(
                lock_name,
                attempts, "lock service unusable for the whole wait window, running action without lock"
            );
            action().await;
            LockOutcome::FailedOpen
        }
    }

    fn qualified(
        &self,
        lock_name: &str,
    ) -> String {
        if self.key_prefix.is_empty() {
            lock_name.to_string()
        } else {
            format!("{}{}{}", self.key_prefix, LOCK_NAME_SEPARATOR, lock_name)
        }
    }

    fn cancelled(
        &self,
        lock_name: &str,
    ) -> LockOutcome {
        info!(lock_name, "lock wait cancelled by shutdown");
        LockOutcome::Cancelled
    }
}
