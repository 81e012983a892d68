use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::context::{TransferContext, TransferLifecycle, TransferSnapshot, transition};
use super::TransferError;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Registry of transfers and the single owner of their state transitions.
///
/// Workers report per-file outcomes here; the coordinator folds them into
/// transfer-level progress and decides when a transfer is done.
#[derive(Debug, Default)]
pub struct TransferCoordinator {
    transfers: DashMap<i64, Arc<TransferContext>>,
}

impl TransferCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the transfer, or return the existing one for `id`.
    ///
    /// A later call may fill in a total size that was unknown (0) at first
    /// registration; a known total is never changed.
    pub fn register_transfer(
        &self,
        id: i64,
        name: impl Into<String>,
        total_size: u64,
    ) -> Arc<TransferContext> {
        let ctx = self
            .transfers
            .entry(id)
            .or_insert_with(|| {
                let ctx = TransferContext::new(id, name.into(), total_size);
                info!(transfer_id = id, transfer_name = ctx.name(), total_size, "Registered transfer");
                Arc::new(ctx)
            })
            .clone();

        if total_size > 0 {
            ctx.with_state(|state| {
                if state.total_size == 0 {
                    state.total_size = total_size;
                }
            });
        }

        ctx
    }

    pub fn get_transfer_context(&self, id: i64) -> Option<Arc<TransferContext>> {
        self.transfers.get(&id).map(|entry| entry.value().clone())
    }

    /// Visit a snapshot of every registered transfer, ordered by id.
    ///
    /// Each snapshot is taken under that transfer's read lock alone and the
    /// lock is released before `visit` runs.
    pub fn get_all_transfers(&self, mut visit: impl FnMut(&TransferSnapshot)) {
        let mut contexts: Vec<Arc<TransferContext>> =
            self.transfers.iter().map(|entry| entry.value().clone()).collect();
        contexts.sort_by_key(|ctx| ctx.id());

        for ctx in contexts {
            let snapshot = ctx.snapshot();
            visit(&snapshot);
        }
    }

    /// Declare the files that make up a transfer.
    pub fn expect_files(&self, id: i64, file_ids: impl IntoIterator<Item = i64>) -> Result<()> {
        let ctx = self.context(id)?;
        ctx.with_state(|state| state.files.extend(file_ids));
        Ok(())
    }

    /// Move a pending transfer to `Downloading` and start its clock.
    pub fn start_transfer(&self, id: i64) -> Result<()> {
        let ctx = self.context(id)?;
        ctx.with_state(|state| transition(id, state, TransferLifecycle::Downloading))?;
        debug!(transfer_id = id, "Transfer downloading");
        Ok(())
    }

    /// Add the on-disk size of a finished file to the transfer total.
    ///
    /// A file is counted once; repeated reports for the same id are ignored.
    /// Returns the transfer's downloaded size after the update.
    pub fn record_file_size(&self, id: i64, file_id: i64, bytes: u64) -> Result<u64> {
        let ctx = self.context(id)?;
        let downloaded = ctx.with_state(|state| {
            if state.file_sizes.contains_key(&file_id) {
                debug!(transfer_id = id, file_id, "File size already recorded");
                return state.downloaded_size;
            }
            state.file_sizes.insert(file_id, bytes);

            let mut downloaded = state.downloaded_size.saturating_add(bytes);
            if state.total_size > 0 && downloaded > state.total_size {
                warn!(
                    transfer_id = id,
                    file_id,
                    downloaded,
                    total = state.total_size,
                    "Downloaded bytes exceed transfer total, clamping"
                );
                downloaded = state.total_size;
            }
            state.downloaded_size = downloaded;
            downloaded
        });

        debug!(
            transfer_id = id,
            file_id,
            file_size = bytes,
            transfer_downloaded = downloaded,
            "Updated transfer with completed file size"
        );
        Ok(downloaded)
    }

    /// Mark a file as done; completes the transfer once every file is done.
    pub fn handle_file_completion(&self, id: i64, file_id: i64) -> Result<TransferLifecycle> {
        let ctx = self.context(id)?;
        ctx.with_state(|state| {
            if !state.files.contains(&file_id) {
                warn!(transfer_id = id, file_id, "Completion for undeclared file, tracking it");
                state.files.insert(file_id);
            }
            state.failed.remove(&file_id);
            state.completed.insert(file_id);

            if state.lifecycle.is_terminal() {
                debug!(transfer_id = id, file_id, state = %state.lifecycle, "Transfer already final");
                return Ok(state.lifecycle);
            }

            if state.all_files_completed() {
                transition(id, state, TransferLifecycle::Completed)?;
                info!(
                    transfer_id = id,
                    transfer_name = ctx.name(),
                    files = state.files.len(),
                    downloaded = state.downloaded_size,
                    "Transfer completed"
                );
            }
            Ok(state.lifecycle)
        })
    }

    /// Mark one file as failed.
    ///
    /// The transfer keeps going while other files are pending or have
    /// succeeded, so the failed file can be retried later. It becomes
    /// `Failed` only once every one of its files has failed.
    pub fn handle_file_failure(&self, id: i64, file_id: i64) -> Result<TransferLifecycle> {
        let ctx = self.context(id)?;
        ctx.with_state(|state| {
            if state.completed.contains(&file_id) {
                warn!(transfer_id = id, file_id, "Ignoring failure for a file that already completed");
                return Ok(state.lifecycle);
            }
            state.files.insert(file_id);
            state.failed.insert(file_id);

            warn!(
                transfer_id = id,
                file_id,
                failed_files = state.failed.len(),
                total_files = state.files.len(),
                "File failed"
            );

            if !state.lifecycle.is_terminal() && state.all_files_failed() {
                transition(id, state, TransferLifecycle::Failed)?;
                warn!(transfer_id = id, transfer_name = ctx.name(), "Transfer failed, no file succeeded");
            }
            Ok(state.lifecycle)
        })
    }

    pub fn cancel_transfer(&self, id: i64) -> Result<()> {
        let ctx = self.context(id)?;
        ctx.with_state(|state| transition(id, state, TransferLifecycle::Cancelled))?;
        info!(transfer_id = id, "Transfer cancelled");
        Ok(())
    }

    /// Cancel every transfer that has not reached a final state. Returns
    /// how many were cancelled.
    pub fn cancel_unfinished(&self) -> usize {
        let unfinished: Vec<i64> = self
            .transfers
            .iter()
            .filter(|entry| !entry.value().lifecycle().is_terminal())
            .map(|entry| *entry.key())
            .collect();

        unfinished
            .into_iter()
            .filter(|&id| match self.cancel_transfer(id) {
                Ok(()) => true,
                Err(e) => {
                    // Finished between the scan and the cancel
                    debug!(transfer_id = id, error = %e, "Transfer not cancelled");
                    false
                }
            })
            .count()
    }

    /// Drop transfers that reached a final state at least `retention` ago.
    /// Returns how many were evicted.
    pub fn evict_finished(&self, retention: Duration) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|_, ctx| {
            !ctx.read_state(|state| {
                state.lifecycle.is_terminal()
                    && state.finished.is_some_and(|finished| finished.elapsed() >= retention)
            })
        });
        let evicted = before.saturating_sub(self.transfers.len());
        if evicted > 0 {
            debug!(evicted, "Evicted finished transfers");
        }
        evicted
    }

    /// True while any downloading transfer still has files in flight.
    pub fn has_pending_work(&self) -> bool {
        self.transfers.iter().any(|entry| {
            entry.value().read_state(|state| {
                state.lifecycle == TransferLifecycle::Downloading && state.has_pending_files()
            })
        })
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    fn context(&self, id: i64) -> Result<Arc<TransferContext>> {
        self.get_transfer_context(id).ok_or(TransferError::NotFound(id))
    }
}
