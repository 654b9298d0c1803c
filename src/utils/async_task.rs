use std::future::Future;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;

/// Runs `task` until it succeeds, bounding each attempt by `policy.timeout()`
/// and sleeping `policy.delay_for(n)` between attempts.
///
/// `policy.max_retries` is the total attempt budget; `0` retries forever.
/// The error of the last attempt is returned once the budget is spent.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut attempts = 0;
    loop {
        let last_error = match timeout(policy.timeout(), task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                warn!(attempt = attempts + 1, error = %e, "task attempt failed");
                e
            }
            Err(_) => {
                warn!(attempt = attempts + 1, timeout = ?policy.timeout(), "task attempt timed out");
                Error::Timeout(policy.timeout())
            }
        };

        attempts += 1;
        if !policy.allows(attempts) {
            warn!(attempts, "task failed after max retries");
            return Err(last_error);
        }
        sleep(policy.delay_for(attempts - 1)).await;
    }
}

/// Spawns `task_fn`, logging its error if it exits with one.
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = task_fn().await {
            error!(task = %name, error = %e, "spawned task stopped with an error");
        }
    })
}
