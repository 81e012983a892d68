use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One file to download, tied to the transfer it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub file_id: i64,
    pub name: String,
    pub transfer_id: i64,
}

impl Job {
    pub fn new(file_id: i64, name: impl Into<String>, transfer_id: i64) -> Self {
        Self {
            file_id,
            name: name.into(),
            transfer_id,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("job queue is closed")]
    Closed,
}

/// Shared job queue feeding the worker pool
///
/// Architecture:
/// 1. Callers `enqueue(job)` into one bounded channel (backpressure when full)
/// 2. Every worker calls `recv()` on the same receiver; whichever worker is
///    free takes the next job, so there is no ordering across workers
/// 3. `recv()` gives up as soon as the shutdown token fires
///
/// The receiver sits behind an async mutex that is held only while a worker
/// waits for its next job, never while a job runs.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        debug!(capacity, "Created job queue");
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Enqueue a job, waiting for room when the queue is full.
    pub async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let file_id = job.file_id;
        self.sender.send(job).await.map_err(|_| QueueError::Closed)?;
        debug!(file_id, "Job enqueued");
        Ok(())
    }

    /// Next job, or `None` once `shutdown` fires or the queue is closed.
    pub async fn recv(&self, shutdown: &CancellationToken) -> Option<Job> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            job = async { self.receiver.lock().await.recv().await } => job,
        }
    }

    /// Stop accepting jobs. Queued jobs are left for `recv` to drain.
    pub async fn close(&self) {
        self.receiver.lock().await.close();
    }

    /// Jobs currently waiting
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
