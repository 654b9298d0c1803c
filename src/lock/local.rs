use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::LockService;
use crate::LockError;

/// New lock names granted between two sweeps of expired leases.
const PRUNE_INTERVAL: usize = 64;

/// In-process [`LockService`]; expiry follows the tokio clock.
///
/// Shared between several [`crate::DistributedLock`]s it behaves like one
/// lock server seen by several nodes.
#[derive(Debug, Default)]
pub struct LocalLockService {
    leases: DashMap<String, (String, Instant)>,
    grants_since_prune: AtomicUsize,
}

impl LocalLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current owner of `lock_name`, if its lease has not expired.
    pub fn holder(
        &self,
        lock_name: &str,
    ) -> Option<String> {
        self.leases
            .get(lock_name)
            .filter(|lease| lease.1 > Instant::now())
            .map(|lease| lease.0.clone())
    }

    /// Lock names currently tracked, expired ones not yet swept included.
    pub fn tracked(&self) -> usize {
        self.leases.len()
    }

    /// Drops every expired lease.
    pub fn prune_expired(&self) {
        let now = Instant::now();
        self.leases.retain(|_, lease| lease.1 > now);
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn try_acquire(
        &self,
        lock_name: &str,
        owner: &str,
        lease: Duration,
    ) -> std::result::Result<bool, LockError> {
        let now = Instant::now();
        let (acquired, new_name) = match self.leases.entry(lock_name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 <= now {
                    entry.insert((owner.to_string(), now + lease));
                    (true, false)
                } else {
                    (false, false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert((owner.to_string(), now + lease));
                (true, true)
            }
        };

        // retain takes every shard lock, so only after the entry guard is gone
        if new_name && self.grants_since_prune.fetch_add(1, Ordering::Relaxed) + 1 >= PRUNE_INTERVAL {
            self.grants_since_prune.store(0, Ordering::Relaxed);
            self.prune_expired();
        }
        Ok(acquired)
    }
}
