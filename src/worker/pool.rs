//! Fixed-size pool of download workers over the shared job queue

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::active::ActiveFiles;
use super::error::DownloadOutcome;
use super::executor::DownloadExecutor;
use super::state::DownloadState;
use crate::observability::Metrics;
use crate::queue::{Job, JobQueue};
use crate::transfer::TransferCoordinator;

/// Everything a worker needs, shared by all workers in the pool
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: JobQueue,
    pub executor: Arc<DownloadExecutor>,
    pub coordinator: Arc<TransferCoordinator>,
    pub active: Arc<ActiveFiles>,
    pub metrics: Arc<Metrics>,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    /// Spawn `count` workers. They run until `shutdown` fires; queued jobs
    /// are not drained on shutdown.
    pub fn spawn(count: usize, ctx: WorkerContext, shutdown: CancellationToken) -> Self {
        let handles = (0..count)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(worker_loop(worker_id, ctx, shutdown))
            })
            .collect();

        info!(workers = count, "Worker pool started");
        Self { handles, shutdown }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Fire the shutdown signal and wait for every worker to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext, shutdown: CancellationToken) {
    debug!(worker_id, "Worker started");
    while let Some(job) = ctx.queue.recv(&shutdown).await {
        process_job(worker_id, &ctx, job, &shutdown).await;
    }
    debug!(worker_id, "Worker stopped");
}

/// Run one job and report its outcome.
///
/// Counters are bumped last, after the coordinator and the active set
/// reflect the outcome.
pub async fn process_job(worker_id: usize, ctx: &WorkerContext, job: Job, cancel: &CancellationToken) {
    if !ctx.active.try_claim(job.file_id) {
        debug!(worker_id, file_id = job.file_id, "File already downloading, skipping");
        ctx.metrics.duplicate_skipped();
        return;
    }

    info!(
        worker_id,
        file_id = job.file_id,
        transfer_id = job.transfer_id,
        file_name = %job.name,
        "Processing job"
    );

    let state = Arc::new(DownloadState::new(&job));
    match ctx.executor.run(state, cancel).await {
        DownloadOutcome::Cancelled => {
            ctx.active.release(job.file_id);
            ctx.metrics.file_cancelled();
        }
        DownloadOutcome::Failed(err) => {
            error!(
                worker_id,
                file_id = job.file_id,
                transfer_id = job.transfer_id,
                error = %err,
                "Download failed"
            );
            ctx.active.release(job.file_id);
            if let Err(e) = ctx.coordinator.handle_file_failure(job.transfer_id, job.file_id) {
                warn!(file_id = job.file_id, error = %e, "Could not record file failure");
            }
            ctx.metrics.file_failed();
        }
        DownloadOutcome::Completed { bytes, .. } => {
            if let Err(e) = ctx.coordinator.handle_file_completion(job.transfer_id, job.file_id) {
                warn!(file_id = job.file_id, error = %e, "Could not record file completion");
            }
            ctx.active.release(job.file_id);
            ctx.metrics.file_completed(bytes);
        }
    }
}
