//! Wires the queue, workers, executor and coordinator together

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{DownloaderConfig, WorkerPoolConfig};
use crate::host::FileHost;
use crate::observability::Metrics;
use crate::queue::{Job, JobQueue, QueueError};
use crate::transfer::{TransferCoordinator, TransferError};
use crate::worker::{ActiveFiles, DownloadExecutor, RetryPolicy, WorkerContext, WorkerPool};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("transfer {0} has no files")]
    EmptyTransfer(i64),
}

/// One file of a transfer
#[derive(Debug, Clone, bon::Builder)]
pub struct FileEntry {
    pub id: i64,
    #[builder(into)]
    pub name: String,
    /// Expected size in bytes, 0 when unknown
    #[builder(default)]
    pub size: u64,
}

/// A transfer and the files that make it up
#[derive(Debug, Clone, bon::Builder)]
pub struct TransferRequest {
    pub id: i64,
    #[builder(into)]
    pub name: String,
    #[builder(default)]
    pub files: Vec<FileEntry>,
}

impl TransferRequest {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }
}

/// Periodic removal of finished transfers
#[derive(Debug, Clone, Copy)]
struct Eviction {
    retention: Duration,
    every: Duration,
}

pub struct DownloadManager {
    host: Arc<dyn FileHost>,
    downloader: Arc<DownloaderConfig>,
    workers: WorkerPoolConfig,
    retry: Option<RetryPolicy>,
    eviction: Option<Eviction>,
    coordinator: Arc<TransferCoordinator>,
    queue: JobQueue,
    active: Arc<ActiveFiles>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    pool: Mutex<Option<WorkerPool>>,
    evictor: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadManager {
    pub fn new(downloader: DownloaderConfig, workers: WorkerPoolConfig, host: Arc<dyn FileHost>) -> Self {
        let queue = JobQueue::new(workers.queue_capacity);
        Self {
            host,
            downloader: Arc::new(downloader),
            workers,
            retry: None,
            eviction: None,
            coordinator: Arc::new(TransferCoordinator::new()),
            queue,
            active: Arc::new(ActiveFiles::new()),
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            pool: Mutex::new(None),
            evictor: Mutex::new(None),
        }
    }

    /// Override the retry policy derived from the downloader config.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Every `every`, drop transfers that finished at least `retention` ago.
    /// Without this, finished transfers are kept until the process exits.
    pub fn with_eviction(mut self, retention: Duration, every: Duration) -> Self {
        self.eviction = Some(Eviction {
            retention,
            every: every.max(Duration::from_millis(1)),
        });
        self
    }

    /// Spawn the worker pool, and the eviction task when one is configured.
    /// Calling this again while it runs does nothing.
    pub fn start(&self) {
        let mut pool = self.pool.lock();
        if pool.is_some() {
            warn!("Worker pool already running");
            return;
        }

        let mut executor = DownloadExecutor::new(
            self.host.clone(),
            self.coordinator.clone(),
            self.downloader.clone(),
            self.metrics.clone(),
        );
        if let Some(retry) = self.retry {
            executor = executor.with_retry_policy(retry);
        }

        let ctx = WorkerContext {
            queue: self.queue.clone(),
            executor: Arc::new(executor),
            coordinator: self.coordinator.clone(),
            active: self.active.clone(),
            metrics: self.metrics.clone(),
        };
        *pool = Some(WorkerPool::spawn(self.workers.count, ctx, self.shutdown.clone()));

        if let Some(eviction) = self.eviction {
            let task = evict_periodically(self.coordinator.clone(), eviction, self.shutdown.clone());
            *self.evictor.lock() = Some(tokio::spawn(task));
        }
    }

    /// Register a transfer and queue every file that has not completed yet.
    ///
    /// Resubmitting a known transfer only queues its unfinished files.
    /// Returns the number of jobs queued.
    pub async fn submit_transfer(&self, request: TransferRequest) -> Result<usize, ManagerError> {
        if request.files.is_empty() {
            return Err(ManagerError::EmptyTransfer(request.id));
        }

        let ctx = self
            .coordinator
            .register_transfer(request.id, request.name.clone(), request.total_size());
        self.coordinator
            .expect_files(request.id, request.files.iter().map(|file| file.id))?;
        self.coordinator.start_transfer(request.id)?;

        let completed = ctx.snapshot().completed_files;
        let mut queued = 0;
        for file in request.files {
            if completed.contains(&file.id) {
                continue;
            }
            self.enqueue(Job::new(file.id, file.name, request.id)).await?;
            queued += 1;
        }

        info!(
            transfer_id = request.id,
            transfer_name = %request.name,
            jobs = queued,
            "Transfer submitted"
        );
        Ok(queued)
    }

    /// Queue a single file, e.g. to retry one that failed.
    pub async fn enqueue(&self, job: Job) -> Result<(), ManagerError> {
        if self.shutdown.is_cancelled() {
            return Err(QueueError::Closed.into());
        }
        self.queue.enqueue(job).await?;
        Ok(())
    }

    /// True when no transfer has outstanding files and no worker is busy.
    pub fn is_idle(&self) -> bool {
        !self.coordinator.has_pending_work() && self.active.is_empty() && self.queue.is_empty()
    }

    /// Fire the shutdown token, wait for the workers and cancel every
    /// transfer that has not finished. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.join().await;
        }
        let evictor = self.evictor.lock().take();
        if let Some(evictor) = evictor {
            if let Err(e) = evictor.await {
                error!(error = %e, "Eviction task panicked");
            }
        }
        self.queue.close().await;

        let cancelled = self.coordinator.cancel_unfinished();
        if cancelled > 0 {
            info!(transfers = cancelled, "Cancelled unfinished transfers");
        }
    }

    pub fn coordinator(&self) -> &Arc<TransferCoordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn active_files(&self) -> &Arc<ActiveFiles> {
        &self.active
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// The process-wide cancellation token
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

async fn evict_periodically(
    coordinator: Arc<TransferCoordinator>,
    eviction: Eviction,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(eviction.every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                coordinator.evict_finished(eviction.retention);
            }
        }
    }
    debug!("Eviction task stopped");
}
