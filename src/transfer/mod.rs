//! Transfer tracking
//!
//! A transfer groups the files of one logical download. The
//! [`TransferCoordinator`] owns every [`TransferContext`], folds per-file
//! outcomes into transfer progress and drives the lifecycle
//! `Pending → Downloading → {Completed | Failed | Cancelled}`.

mod context;
mod coordinator;

pub use context::{TransferContext, TransferLifecycle, TransferSnapshot};
pub use coordinator::TransferCoordinator;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer {0} not found")]
    NotFound(i64),

    #[error("transfer {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: TransferLifecycle,
        to: TransferLifecycle,
    },
}
