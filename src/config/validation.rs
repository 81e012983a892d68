use super::models::{Config, DownloaderConfig, TransfersConfig, WorkerPoolConfig};
use crate::humanize::{GIB, MIB};
use thiserror::Error;

/// Connections-per-server ceiling accepted by the downloader
const MAX_CONNECTIONS: u32 = 16;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Worker pool needs at least one worker")]
    NoWorkers,

    #[error("Job queue capacity must be positive")]
    ZeroQueueCapacity,

    #[error("Downloader binary must not be empty")]
    EmptyBinary,

    #[error("connections must be between 1 and {MAX_CONNECTIONS}, got {0}")]
    InvalidConnections(u32),

    #[error("segments must be positive")]
    ZeroSegments,

    #[error("min_split_size must be between 1MB and 1GB, got {0} bytes")]
    InvalidMinSplitSize(u64),

    #[error("max_attempts must be positive")]
    ZeroAttempts,

    #[error("progress_interval_secs must be positive")]
    ZeroProgressInterval,

    #[error("eviction_interval_secs must be positive")]
    ZeroEvictionInterval,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_workers(&config.workers)?;
    validate_downloader(&config.downloader)?;
    validate_transfers(&config.transfers)?;
    Ok(())
}

fn validate_transfers(transfers: &TransfersConfig) -> Result<(), ValidationError> {
    if transfers.eviction_interval_secs == 0 {
        return Err(ValidationError::ZeroEvictionInterval);
    }
    Ok(())
}

fn validate_workers(workers: &WorkerPoolConfig) -> Result<(), ValidationError> {
    if workers.count == 0 {
        return Err(ValidationError::NoWorkers);
    }
    if workers.queue_capacity == 0 {
        return Err(ValidationError::ZeroQueueCapacity);
    }
    Ok(())
}

fn validate_downloader(downloader: &DownloaderConfig) -> Result<(), ValidationError> {
    if downloader.binary.as_os_str().is_empty() {
        return Err(ValidationError::EmptyBinary);
    }

    if downloader.connections == 0 || downloader.connections > MAX_CONNECTIONS {
        return Err(ValidationError::InvalidConnections(downloader.connections));
    }

    if downloader.segments == 0 {
        return Err(ValidationError::ZeroSegments);
    }

    let split = downloader.min_split_size.as_u64();
    if !(MIB..=GIB).contains(&split) {
        return Err(ValidationError::InvalidMinSplitSize(split));
    }

    if downloader.max_attempts == 0 {
        return Err(ValidationError::ZeroAttempts);
    }

    if downloader.progress_interval_secs == 0 {
        return Err(ValidationError::ZeroProgressInterval);
    }

    Ok(())
}
