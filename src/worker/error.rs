use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::host::HostError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download of {0} cancelled")]
    Cancelled(String),

    #[error("failed to get download URL: {0}")]
    Url(#[from] HostError),

    #[error("invalid file name {0:?}")]
    InvalidName(String),

    #[error("failed to prepare {path}: {source}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run downloader: {0}")]
    Spawn(#[source] io::Error),

    #[error("downloader exited with {status}{}", format_detail(.detail))]
    Process {
        status: String,
        /// Exit code, absent when the process was killed by a signal
        code: Option<i32>,
        detail: Option<String>,
    },

    #[error("failed to verify downloaded file: {0}")]
    Verify(#[source] io::Error),

    #[error("permanent error on attempt {attempt}: {source}")]
    Permanent {
        attempt: u32,
        #[source]
        source: Box<DownloadError>,
    },

    #[error("failed after {attempts} attempts, last error: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<DownloadError>,
    },
}

impl DownloadError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Underlying I/O error, if this failure came from one.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Self::Prepare { source, .. } => Some(source),
            Self::Spawn(e) | Self::Verify(e) => Some(e),
            _ => None,
        }
    }
}

fn format_detail(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

/// Final result of one job
#[derive(Debug)]
pub enum DownloadOutcome {
    Completed { bytes: u64, elapsed: Duration },
    Cancelled,
    Failed(DownloadError),
}

impl DownloadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
