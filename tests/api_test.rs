use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt; // for `oneshot`

use transferd::api::{self, AppState};
use transferd::observability::Metrics;
use transferd::transfer::TransferCoordinator;

/// Coordinator with one transfer in each interesting state
fn seeded_coordinator() -> Arc<TransferCoordinator> {
    let coordinator = Arc::new(TransferCoordinator::new());

    // Downloading, half done
    coordinator.register_transfer(1, "Season 1", 2 * 1024 * 1024);
    coordinator.expect_files(1, [10, 11]).unwrap();
    coordinator.start_transfer(1).unwrap();
    coordinator.record_file_size(1, 10, 1024 * 1024).unwrap();
    coordinator.handle_file_completion(1, 10).unwrap();

    // Downloading, total unknown
    coordinator.register_transfer(2, "Unknown size", 0);
    coordinator.expect_files(2, [20]).unwrap();
    coordinator.start_transfer(2).unwrap();

    // Registered but not started
    coordinator.register_transfer(3, "Queued", 500);
    coordinator.expect_files(3, [30]).unwrap();

    // Finished
    coordinator.register_transfer(4, "Done", 10);
    coordinator.expect_files(4, [40]).unwrap();
    coordinator.start_transfer(4).unwrap();
    coordinator.record_file_size(4, 40, 10).unwrap();
    coordinator.handle_file_completion(4, 40).unwrap();

    coordinator
}

fn app(coordinator: Arc<TransferCoordinator>) -> Router {
    api::router(AppState::new(coordinator, Arc::new(Metrics::new())))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_health() {
    let (status, body) = get(app(seeded_coordinator()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_list_only_downloading_with_known_total() {
    let (status, body) = get(app(seeded_coordinator()), "/api/transfers").await;
    assert_eq!(status, StatusCode::OK);

    let list: Value = serde_json::from_slice(&body).unwrap();
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);

    let entry = &list[0];
    assert_eq!(entry["name"], "Season 1");
    assert_eq!(entry["progress_percent"], 50.0);
    assert_eq!(entry["downloaded_mb"], 1.0);
    assert_eq!(entry["total_mb"], 2.0);
    assert!(entry["speed_mbps"].as_f64().unwrap() >= 0.0);
    assert!(entry["eta"].is_string());
}

#[tokio::test]
async fn test_downloads_path_lists_the_same_transfers() {
    let (status, downloads) = get(app(seeded_coordinator()), "/api/downloads").await;
    assert_eq!(status, StatusCode::OK);
    let (_, transfers) = get(app(seeded_coordinator()), "/api/transfers").await;

    let downloads: Value = serde_json::from_slice(&downloads).unwrap();
    let transfers: Value = serde_json::from_slice(&transfers).unwrap();
    assert_eq!(downloads.as_array().unwrap().len(), 1);
    assert_eq!(downloads[0]["name"], transfers[0]["name"]);
    assert_eq!(downloads[0]["progress_percent"], transfers[0]["progress_percent"]);
    assert_eq!(downloads[0]["total_mb"], transfers[0]["total_mb"]);
}

#[tokio::test]
async fn test_dashboard_page() {
    let response = app(seeded_coordinator())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"), "{content_type}");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let page = String::from_utf8(body.to_vec()).unwrap();
    assert!(page.contains("<title>transferd</title>"));
    assert!(page.contains("fetch('/api/downloads')"));
    assert!(page.contains("setInterval(updateDashboard, 2000)"));
}

#[tokio::test]
async fn test_eta_calculating_before_any_bytes() {
    let coordinator = Arc::new(TransferCoordinator::new());
    coordinator.register_transfer(7, "Fresh", 4096);
    coordinator.expect_files(7, [70]).unwrap();
    coordinator.start_transfer(7).unwrap();

    let (_, body) = get(app(coordinator), "/api/transfers").await;
    let list: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(list[0]["eta"], "calculating...");
    assert_eq!(list[0]["speed_mbps"], 0.0);
}

#[tokio::test]
async fn test_transfer_detail() {
    let (status, body) = get(app(seeded_coordinator()), "/api/transfers/1").await;
    assert_eq!(status, StatusCode::OK);

    let detail: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(detail["id"], 1);
    assert_eq!(detail["state"], "downloading");
    assert_eq!(detail["completed_files"], serde_json::json!([10]));
    assert_eq!(detail["pending_files"], serde_json::json!([11]));
    assert!(detail["started_at"].is_string());

    let (_, body) = get(app(seeded_coordinator()), "/api/transfers/4").await;
    let detail: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(detail["state"], "completed");
}

#[tokio::test]
async fn test_unknown_transfer_is_404() {
    let (status, body) = get(app(seeded_coordinator()), "/api/transfers/99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_metrics() {
    let metrics = Arc::new(Metrics::new());
    metrics.file_completed(2048);
    metrics.file_failed();
    let app = api::router(AppState::new(seeded_coordinator(), metrics));

    let (status, body) = get(app, "/api/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let snapshot: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(snapshot["files_completed"], 1);
    assert_eq!(snapshot["files_failed"], 1);
    assert_eq!(snapshot["bytes_downloaded"], 2048);
}
