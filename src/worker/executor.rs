//! Runs one file download through the external downloader

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{DownloadError, DownloadOutcome};
use super::progress::ProgressMonitor;
use super::retry::{ErrorClassifier, RetryPolicy, TransientErrorClassifier};
use super::state::DownloadState;
use crate::config::DownloaderConfig;
use crate::host::FileHost;
use crate::humanize::bytes_to_mb;
use crate::observability::Metrics;
use crate::transfer::TransferCoordinator;

/// Suffix of the downloader's resume-control file
const CONTROL_SUFFIX: &str = ".aria2";

/// Lower bound on elapsed time for the average-speed log field
const MIN_ELAPSED: Duration = Duration::from_millis(1);

pub struct DownloadExecutor {
    host: Arc<dyn FileHost>,
    coordinator: Arc<TransferCoordinator>,
    config: Arc<DownloaderConfig>,
    metrics: Arc<Metrics>,
    classifier: Arc<dyn ErrorClassifier>,
    retry: RetryPolicy,
}

impl DownloadExecutor {
    pub fn new(
        host: Arc<dyn FileHost>,
        coordinator: Arc<TransferCoordinator>,
        config: Arc<DownloaderConfig>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let retry = RetryPolicy::new(config.max_attempts);
        Self {
            host,
            coordinator,
            config,
            metrics,
            classifier: Arc::new(TransientErrorClassifier),
            retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Download one file, retrying transient failures.
    ///
    /// On success the file size is reported to the owning transfer exactly
    /// once. Cancellation short-circuits any remaining attempts.
    pub async fn run(&self, state: Arc<DownloadState>, cancel: &CancellationToken) -> DownloadOutcome {
        let attempt_state = state.clone();
        let result = self
            .retry
            .run(&state.name, cancel, self.classifier.as_ref(), move |attempt| {
                let state = attempt_state.clone();
                async move {
                    if attempt > 1 {
                        self.metrics.retry();
                    }
                    self.attempt(state, attempt, cancel).await
                }
            })
            .await;

        match result {
            Ok(bytes) => {
                let elapsed = state.start_time.elapsed();
                let size_mb = bytes_to_mb(bytes);
                let speed_mbps = size_mb / elapsed.max(MIN_ELAPSED).as_secs_f64();

                if let Err(e) = self
                    .coordinator
                    .record_file_size(state.transfer_id, state.file_id, bytes)
                {
                    warn!(file_id = state.file_id, error = %e, "Could not record file size");
                }

                info!(
                    file_id = state.file_id,
                    file_name = %state.name,
                    size_mb,
                    speed_mbps,
                    duration_ms = elapsed.as_millis() as u64,
                    "Download completed"
                );
                DownloadOutcome::Completed { bytes, elapsed }
            }
            Err(e) if e.is_cancelled() => {
                info!(file_id = state.file_id, file_name = %state.name, "Download cancelled");
                DownloadOutcome::Cancelled
            }
            Err(e) => DownloadOutcome::Failed(e),
        }
    }

    async fn attempt(
        &self,
        state: Arc<DownloadState>,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let url = self.host.download_url(state.file_id).await?;
        let target = prepare_target(&self.config.target_dir, &state.name).await?;

        debug!(file_id = state.file_id, attempt, url, target = %target.display(), "Starting downloader");

        let mut child = Command::new(&self.config.binary)
            .args(downloader_args(&self.config, &state.name, &url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(DownloadError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Spawn(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Spawn(std::io::Error::other("stderr not captured")))?;

        let done = CancellationToken::new();
        let monitor = ProgressMonitor::new(state.clone(), self.config.progress_interval());
        let monitor_task = tokio::spawn(monitor.run(stdout, stderr, done.clone(), cancel.clone()));

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(file_id = state.file_id, error = %e, "Failed to kill downloader");
                }
                done.cancel();
                let _ = monitor_task.await;
                return Err(DownloadError::Cancelled(state.name.clone()));
            }
            status = child.wait() => status.map_err(DownloadError::Spawn),
        };

        done.cancel();
        let detail = monitor_task.await.unwrap_or_default();
        let status = status?;

        if !status.success() {
            return Err(DownloadError::Process {
                status: status.to_string(),
                code: status.code(),
                detail,
            });
        }

        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(DownloadError::Verify)?;
        Ok(metadata.len())
    }
}

/// Resolve `name` under `dir` and get the path ready for the downloader.
///
/// A leftover file without a resume-control file next to it came from
/// somewhere else and is removed so the downloader starts clean.
async fn prepare_target(dir: &Path, name: &str) -> Result<PathBuf, DownloadError> {
    let relative = Path::new(name);
    let safe = !name.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !safe {
        return Err(DownloadError::InvalidName(name.to_string()));
    }

    let target = dir.join(relative);
    let parent = target.parent().unwrap_or(dir);
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| DownloadError::Prepare {
            path: parent.to_path_buf(),
            source,
        })?;

    let mut control = target.clone().into_os_string();
    control.push(CONTROL_SUFFIX);

    let has_target = tokio::fs::try_exists(&target).await.unwrap_or(false);
    let has_control = tokio::fs::try_exists(&control).await.unwrap_or(false);
    if has_target && !has_control {
        debug!(target = %target.display(), "Removing partial file without control file");
        tokio::fs::remove_file(&target)
            .await
            .map_err(|source| DownloadError::Prepare {
                path: target.clone(),
                source,
            })?;
    }

    Ok(target)
}

fn downloader_args(config: &DownloaderConfig, name: &str, url: &str) -> Vec<String> {
    let mut args = config.leading_args.clone();
    args.extend([
        format!("--max-connection-per-server={}", config.connections),
        format!("--split={}", config.segments),
        format!("--min-split-size={}", config.min_split_size.as_u64()),
        format!("--max-tries={}", config.max_tries),
        format!("--retry-wait={}", config.retry_wait_secs),
        format!("--connect-timeout={}", config.connect_timeout_secs),
        format!("--timeout={}", config.timeout_secs),
        "--allow-overwrite=true".to_string(),
        "--auto-file-renaming=false".to_string(),
        "--continue=true".to_string(),
        "--summary-interval=0".to_string(),
        "--console-log-level=notice".to_string(),
        format!("--dir={}", config.target_dir.display()),
        format!("--out={name}"),
        url.to_string(),
    ]);
    args
}
