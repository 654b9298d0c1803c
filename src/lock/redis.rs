use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::RedisError;
use deadpool_redis::redis::Script;
use deadpool_redis::Runtime;
use tracing::debug;
use tracing::info;

use super::LockService;
use crate::LockConfig;
use crate::LockError;
use crate::LockErrorKind;

// SET NX PX: take the lock only if nobody holds it, with a self-expiring lease
const ACQUIRE_SCRIPT: &str = r#"
return redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2])
"#;

enum RedisPool {
    Single(deadpool_redis::Pool),
    Cluster(deadpool_redis::cluster::Pool),
}

/// [`LockService`] backed by Redis, a single server or a cluster.
pub struct RedisLockService {
    pool: RedisPool,
    urls: Vec<String>,
}

impl std::fmt::Debug for RedisLockService {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let mode = match self.pool {
            RedisPool::Single(_) => "single",
            RedisPool::Cluster(_) => "cluster",
        };
        f.debug_struct("RedisLockService")
            .field("mode", &mode)
            .field("urls", &self.urls)
            .finish()
    }
}

impl RedisLockService {
    /// Builds the connection pool. More than one url selects cluster mode.
    ///
    /// Connections are opened lazily, so an unreachable server is reported by
    /// the first acquisition, not here.
    pub fn from_config(config: &LockConfig) -> std::result::Result<Self, LockError> {
        let urls = config.urls_with_redis_prefix();
        let pool = match urls.as_slice() {
            [] => {
                return Err(LockError::new(
                    LockErrorKind::InvalidOperation,
                    "",
                    "lock.urls must name at least one server when distributed locking is enabled",
                ))
            }
            [url] => deadpool_redis::Config::from_url(url.clone())
                .create_pool(Some(Runtime::Tokio1))
                .map(RedisPool::Single)
                .map_err(|e| LockError::new(LockErrorKind::InvalidOperation, "", e))?,
            _ => deadpool_redis::cluster::Config::from_urls(urls.clone())
                .create_pool(Some(Runtime::Tokio1))
                .map(RedisPool::Cluster)
                .map_err(|e| LockError::new(LockErrorKind::InvalidOperation, "", e))?,
        };

        info!(?urls, cluster = urls.len() > 1, "lock service pool created");
        Ok(Self { pool, urls })
    }
}

fn classify(
    lock_name: &str,
    err: RedisError,
) -> LockError {
    let kind = if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        LockErrorKind::Unavailable
    } else {
        LockErrorKind::Backend
    };
    LockError::new(kind, lock_name, err)
}

#[async_trait]
impl LockService for RedisLockService {
    async fn try_acquire(
        &self,
        lock_name: &str,
        owner: &str,
        lease: Duration,
    ) -> std::result::Result<bool, LockError> {
        let lease_ms = lease.as_millis() as u64;
        let script = Script::new(ACQUIRE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(lock_name).arg(owner).arg(lease_ms);

        let reply: Option<String> = match &self.pool {
            RedisPool::Single(pool) => {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| LockError::new(LockErrorKind::Unavailable, lock_name, e))?;
                invocation.invoke_async(&mut conn).await
            }
            RedisPool::Cluster(pool) => {
                let mut conn = pool
                    .get()
                    .await
                    .map_err(|e| LockError::new(LockErrorKind::Unavailable, lock_name, e))?;
                invocation.invoke_async(&mut conn).await
            }
        }
        .map_err(|e| classify(lock_name, e))?;

        debug!(lock_name, acquired = reply.is_some(), "lock acquisition attempt");
        Ok(reply.is_some())
    }
}
