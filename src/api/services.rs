use axum::{
    Json,
    extract::{Path, State},
    response::{Html, IntoResponse},
};

use super::{
    error::ApiError,
    models::{DownloadInfo, TransferDetail},
    state::AppState,
};
use crate::observability::MetricsSnapshot;
use crate::transfer::TransferLifecycle;

const DASHBOARD_PAGE: &str = include_str!("dashboard.html");

/// Progress page, refreshed from `/api/downloads` every 2s (GET /)
pub async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_PAGE)
}

/// Liveness probe (GET /health)
pub async fn health() -> &'static str {
    "ok"
}

/// Transfers in flight (GET /api/transfers, GET /api/downloads)
///
/// Only transfers that are downloading and know their total size are
/// listed; the rest have nothing meaningful to show yet.
pub async fn list_transfers(State(state): State<AppState>) -> Json<Vec<DownloadInfo>> {
    let mut downloads = Vec::new();
    state.coordinator.get_all_transfers(|snapshot| {
        if snapshot.state == TransferLifecycle::Downloading && snapshot.total_size > 0 {
            downloads.push(DownloadInfo::from(snapshot));
        }
    });
    Json(downloads)
}

/// One transfer in any state (GET /api/transfers/{id})
pub async fn get_transfer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = state
        .coordinator
        .get_transfer_context(id)
        .ok_or_else(|| ApiError::NotFound(format!("transfer {id}")))?;

    Ok(Json(TransferDetail::from(ctx.snapshot())))
}

/// Worker counters (GET /api/metrics)
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
