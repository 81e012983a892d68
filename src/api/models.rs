//! Dashboard response bodies
//!
//! `GET /api/transfers` returns one [`DownloadInfo`] per transfer that is
//! downloading and has a known total size:
//!
//! ```json
//! [
//!   {
//!     "name": "Season 1",
//!     "progress_percent": 41.7,
//!     "downloaded_mb": 512.0,
//!     "total_mb": 1228.8,
//!     "speed_mbps": 45.2,
//!     "eta": "15s"
//!   }
//! ]
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::humanize::{bytes_to_mb, format_duration};
use crate::transfer::{TransferLifecycle, TransferSnapshot};

/// Shown until the average throughput is known
pub const ETA_CALCULATING: &str = "calculating...";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DownloadInfo {
    pub name: String,
    pub progress_percent: f64,
    pub downloaded_mb: f64,
    pub total_mb: f64,
    pub speed_mbps: f64,
    pub eta: String,
}

impl From<&TransferSnapshot> for DownloadInfo {
    fn from(snapshot: &TransferSnapshot) -> Self {
        let eta = snapshot
            .eta_seconds()
            .map(format_duration)
            .unwrap_or_else(|| ETA_CALCULATING.to_string());

        Self {
            name: snapshot.name.clone(),
            progress_percent: snapshot.percent(),
            downloaded_mb: bytes_to_mb(snapshot.downloaded_size),
            total_mb: bytes_to_mb(snapshot.total_size),
            speed_mbps: snapshot.throughput_mbps().unwrap_or(0.0),
            eta,
        }
    }
}

/// Full view of one transfer, any state
#[derive(Debug, Clone, Serialize)]
pub struct TransferDetail {
    pub id: i64,
    pub name: String,
    pub state: TransferLifecycle,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub progress_percent: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub pending_files: Vec<i64>,
    pub completed_files: Vec<i64>,
    pub failed_files: Vec<i64>,
}

impl From<TransferSnapshot> for TransferDetail {
    fn from(snapshot: TransferSnapshot) -> Self {
        Self {
            progress_percent: snapshot.percent(),
            id: snapshot.id,
            name: snapshot.name,
            state: snapshot.state,
            total_size: snapshot.total_size,
            downloaded_size: snapshot.downloaded_size,
            started_at: snapshot.started_at,
            pending_files: snapshot.pending_files,
            completed_files: snapshot.completed_files,
            failed_files: snapshot.failed_files,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}
