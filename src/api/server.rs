use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{
    services::{dashboard, get_transfer, health, list_transfers, metrics},
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/health", get(health))
        .route("/api/transfers", get(list_transfers))
        // Path polled by the dashboard page
        .route("/api/downloads", get(list_transfers))
        .route("/api/transfers/{id}", get(get_transfer))
        .route("/api/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the dashboard until `shutdown` fires.
pub async fn serve(address: SocketAddr, state: AppState, shutdown: CancellationToken) -> Result<(), AnyError> {
    let listener = TcpListener::bind(address).await?;
    info!(address = %listener.local_addr()?, "Dashboard listening");

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Dashboard stopped");
    Ok(())
}
