use std::path::Path;
use std::sync::Arc;

use config_refresh::BusRefreshPublisher;
use config_refresh::ChangeWatcher;
use config_refresh::DistributedLock;
use config_refresh::EtcdBackend;
use config_refresh::Error;
use config_refresh::RedisLockService;
use config_refresh::RefreshEvent;
use config_refresh::Result;
use config_refresh::Settings;
use config_refresh::StoreConnector;
use config_refresh::WatcherState;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let override_path = std::env::args().nth(1);
    let settings = Settings::load(override_path.as_deref())?;

    // Initializing Logs
    let _guard = init_observability(settings.log_dir.as_deref())?;

    // Initializing Shutdown Signal
    let shutdown = CancellationToken::new();

    // Store
    let connector = Arc::new(
        StoreConnector::new(settings.store.urls_with_http_prefix(), Arc::new(EtcdBackend::new()))
            .with_request_timeout(settings.store.request_timeout())
            .with_shutdown(shutdown.clone()),
    );
    connector
        .connect_with_retry(settings.store.connect_options(), settings.retry.connect)
        .await?;

    // Refresh deduplication
    let lock = if settings.lock.distributed_lock_enabled {
        let service = RedisLockService::from_config(&settings.lock)?;
        DistributedLock::new(&settings.lock, Arc::new(service))
    } else {
        info!("distributed lock disabled, every node publishes every refresh");
        DistributedLock::disabled()
    }
    .with_shutdown(shutdown.clone());

    // Refresh bus
    let publisher = Arc::new(BusRefreshPublisher::from_config(&settings.bus));
    tokio::spawn(log_refresh_events(publisher.subscribe(), shutdown.clone()));

    let watcher = ChangeWatcher::new(
        connector.clone(),
        Arc::new(lock),
        publisher,
        settings.store.key_prefix_order.clone(),
    )
    .with_range_start(settings.store.watch_range_start.clone())
    .with_reconnect_policy(settings.retry.watch)
    .with_shutdown(shutdown.clone());
    watcher.start().await?;

    info!("Application started. Waiting for CTRL+C signal...");
    let mut state = watcher.subscribe_state();
    tokio::select! {
        r = graceful_shutdown() => {
            if let Err(e) = r {
                error!("Failed to listen for shutdown signal: {:?}", e);
            }
        }
        _ = state.wait_for(|s| *s == WatcherState::Closed) => {
            error!("change watcher closed on its own, shutting down");
        }
    }

    shutdown.cancel();
    watcher.shutdown().await;
    info!(stats = ?watcher.stats(), "Exiting program.");
    Ok(())
}

async fn graceful_shutdown() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    info!("Shutdown server..");
    Ok(())
}

/// Stand-in bus consumer: refresh events are only logged.
async fn log_refresh_events(
    mut events: broadcast::Receiver<RefreshEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => info!(
                    origin = %event.origin_service,
                    destination = %event.destination,
                    "refresh remote application"
                ),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "refresh event consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

pub fn init_observability(log_dir: Option<&Path>) -> Result<WorkerGuard> {
    let (non_blocking, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| Error::Fatal(format!("log dir {}: {}", dir.display(), e)))?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "config-refresh.log"))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
