use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use transferd::api::{self, AppState};
use transferd::config::{Config, TelemetryConfig};
use transferd::manager::DownloadManager;
use transferd::manifest::Manifest;
use transferd::observability;

use crate::cli::RunArgs;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const IDLE_POLL: Duration = Duration::from_millis(500);

pub async fn run(args: RunArgs) -> Result<(), AnyError> {
    // Installed before the config is read so its loading is logged too
    let log_filter = observability::init_tracing(&TelemetryConfig::default().log_filter);

    let config = match args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(log_filter) = &log_filter {
        log_filter.apply(&config.telemetry.log_filter);
    }

    info!(manifest = %args.manifest.display(), "Loading manifest");
    let manifest = Manifest::load(&args.manifest)?;
    let (host, requests) = manifest.into_parts();

    let manager = Arc::new(
        DownloadManager::new(config.downloader.clone(), config.workers.clone(), Arc::new(host))
            .with_eviction(config.transfers.retention(), config.transfers.eviction_interval()),
    );
    let shutdown = manager.shutdown_token();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    manager.start();

    let dashboard = config.dashboard.enabled.then(|| {
        let state = AppState::from_manager(&manager);
        let address = config.dashboard.bind_addr;
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(address, state, token.clone()).await {
                error!(error = %e, "Dashboard failed");
                token.cancel();
            }
        })
    });

    for request in requests {
        let id = request.id;
        if let Err(e) = manager.submit_transfer(request).await {
            warn!(transfer_id = id, error = %e, "Could not submit transfer");
        }
    }

    if args.exit_when_idle {
        wait_until_idle(&manager, &shutdown).await;
    } else {
        shutdown.cancelled().await;
    }

    manager.shutdown().await;
    if let Some(dashboard) = dashboard {
        if let Err(e) = dashboard.await {
            error!(error = %e, "Dashboard task panicked");
        }
    }

    let totals = manager.metrics().snapshot();
    info!(
        files_completed = totals.files_completed,
        files_failed = totals.files_failed,
        files_cancelled = totals.files_cancelled,
        retries = totals.retries,
        bytes_downloaded = totals.bytes_downloaded,
        "transferd stopped"
    );
    Ok(())
}

async fn wait_until_idle(manager: &DownloadManager, shutdown: &CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(IDLE_POLL) => {
                if manager.is_idle() {
                    info!("All transfers settled");
                    return;
                }
            }
        }
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => return,
    }

    info!("Shutdown signal received");
    token.cancel();
}
