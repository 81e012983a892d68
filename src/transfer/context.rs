use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use super::TransferError;
use crate::humanize::bytes_to_mb;

/// Lifecycle of a transfer. `Completed`, `Failed` and `Cancelled` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferLifecycle {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TransferLifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransferLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable part of a transfer, only ever touched under the context lock
#[derive(Debug)]
pub(super) struct TransferState {
    pub(super) lifecycle: TransferLifecycle,
    pub(super) total_size: u64,
    pub(super) downloaded_size: u64,
    pub(super) started: Option<Instant>,
    pub(super) started_at: Option<DateTime<Utc>>,
    /// When the transfer reached a final state
    pub(super) finished: Option<Instant>,
    pub(super) files: HashSet<i64>,
    pub(super) completed: HashSet<i64>,
    pub(super) failed: HashSet<i64>,
    pub(super) file_sizes: HashMap<i64, u64>,
}

impl TransferState {
    fn new(total_size: u64) -> Self {
        Self {
            lifecycle: TransferLifecycle::Pending,
            total_size,
            downloaded_size: 0,
            started: None,
            started_at: None,
            finished: None,
            files: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            file_sizes: HashMap::new(),
        }
    }

    pub(super) fn all_files_completed(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|id| self.completed.contains(id))
    }

    pub(super) fn all_files_failed(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(|id| self.failed.contains(id))
    }

    pub(super) fn has_pending_files(&self) -> bool {
        self.files
            .iter()
            .any(|id| !self.completed.contains(id) && !self.failed.contains(id))
    }
}

/// One logical transfer and its aggregate progress.
///
/// Readers get a consistent [`TransferSnapshot`]; every mutation goes through
/// [`TransferCoordinator`](super::TransferCoordinator).
#[derive(Debug)]
pub struct TransferContext {
    id: i64,
    name: String,
    state: RwLock<TransferState>,
}

impl TransferContext {
    pub(super) fn new(id: i64, name: String, total_size: u64) -> Self {
        Self {
            id,
            name,
            state: RwLock::new(TransferState::new(total_size)),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> TransferLifecycle {
        self.state.read().lifecycle
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let state = self.state.read();

        let mut pending: Vec<i64> = state
            .files
            .iter()
            .copied()
            .filter(|id| !state.completed.contains(id) && !state.failed.contains(id))
            .collect();
        let mut completed: Vec<i64> = state.completed.iter().copied().collect();
        let mut failed: Vec<i64> = state.failed.iter().copied().collect();
        pending.sort_unstable();
        completed.sort_unstable();
        failed.sort_unstable();

        TransferSnapshot {
            id: self.id,
            name: self.name.clone(),
            state: state.lifecycle,
            total_size: state.total_size,
            downloaded_size: state.downloaded_size,
            started: state.started,
            started_at: state.started_at,
            pending_files: pending,
            completed_files: completed,
            failed_files: failed,
        }
    }

    pub(super) fn read_state<R>(&self, f: impl FnOnce(&TransferState) -> R) -> R {
        f(&self.state.read())
    }

    /// Run `f` with exclusive access to the mutable state.
    pub(super) fn with_state<R>(&self, f: impl FnOnce(&mut TransferState) -> R) -> R {
        f(&mut self.state.write())
    }
}

/// Apply a lifecycle change. Leaving a final state is rejected, staying in
/// the same state is a no-op.
pub(super) fn transition(
    id: i64,
    state: &mut TransferState,
    to: TransferLifecycle,
) -> Result<(), TransferError> {
    let from = state.lifecycle;
    if from == to {
        return Ok(());
    }
    if from.is_terminal() || to == TransferLifecycle::Pending {
        return Err(TransferError::InvalidTransition { id, from, to });
    }

    if to == TransferLifecycle::Downloading && state.started.is_none() {
        state.started = Some(Instant::now());
        state.started_at = Some(Utc::now());
    }
    if to.is_terminal() {
        state.finished = Some(Instant::now());
    }
    state.lifecycle = to;
    Ok(())
}

/// Point-in-time copy of a transfer for read-only consumers
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub id: i64,
    pub name: String,
    pub state: TransferLifecycle,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub started: Option<Instant>,
    pub started_at: Option<DateTime<Utc>>,
    pub pending_files: Vec<i64>,
    pub completed_files: Vec<i64>,
    pub failed_files: Vec<i64>,
}

impl TransferSnapshot {
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }

    /// Share of the total already on disk, 0 while the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        self.downloaded_size as f64 / self.total_size as f64 * 100.0
    }

    /// Average throughput since the transfer started, in MB/s.
    pub fn throughput_mbps(&self) -> Option<f64> {
        let elapsed = self.elapsed()?.as_secs_f64();
        if elapsed <= 0.0 || self.downloaded_size == 0 {
            return None;
        }
        Some(bytes_to_mb(self.downloaded_size) / elapsed)
    }

    /// Seconds until completion at the current average throughput.
    pub fn eta_seconds(&self) -> Option<i64> {
        let speed = self.throughput_mbps()?;
        if speed <= 0.0 {
            return None;
        }
        let remaining = bytes_to_mb(self.total_size.saturating_sub(self.downloaded_size));
        Some((remaining / speed) as i64)
    }
}
