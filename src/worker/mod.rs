//! Download workers
//!
//! A fixed pool of workers pulls [`Job`](crate::queue::Job)s off the shared
//! queue, claims the file, and hands it to the [`DownloadExecutor`], which
//! drives the external downloader with retries. Outcomes are reported back
//! to the [`TransferCoordinator`](crate::transfer::TransferCoordinator).

mod active;
mod error;
mod executor;
mod pool;
pub mod progress;
pub mod retry;
mod state;

pub use active::ActiveFiles;
pub use error::{DownloadError, DownloadOutcome};
pub use executor::DownloadExecutor;
pub use pool::{WorkerContext, WorkerPool, process_job};
pub use retry::{ErrorClassifier, RetryPolicy, TransientErrorClassifier, is_transient};
pub use state::{DownloadState, Progress};
