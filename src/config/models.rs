use crate::humanize::{ByteSize, MIB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub workers: WorkerPoolConfig,
    #[serde(default)]
    pub transfers: TransfersConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// External downloader invocation and retry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloaderConfig {
    /// Downloader executable (aria2c-compatible command line)
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Arguments placed before the downloader flags, e.g. a wrapper script
    #[serde(default)]
    pub leading_args: Vec<String>,
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,
    #[serde(default = "default_connections")]
    pub connections: u32,
    #[serde(default = "default_segments")]
    pub segments: u32,
    #[serde(default = "default_min_split_size")]
    pub min_split_size: ByteSize,
    /// Retries performed by the downloader itself, per attempt
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum gap between two progress log lines for one file
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
    /// Attempts per file before giving up on transient errors
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl DownloaderConfig {
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            leading_args: Vec::new(),
            target_dir: default_target_dir(),
            connections: default_connections(),
            segments: default_segments(),
            min_split_size: default_min_split_size(),
            max_tries: default_max_tries(),
            retry_wait_secs: default_retry_wait_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
            progress_interval_secs: default_progress_interval_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("aria2c")
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_connections() -> u32 {
    16
}

fn default_segments() -> u32 {
    16
}

fn default_min_split_size() -> ByteSize {
    ByteSize(MIB)
}

fn default_max_tries() -> u32 {
    5
}

fn default_retry_wait_secs() -> u64 {
    3
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_progress_interval_secs() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

/// Worker pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerPoolConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1000
}

/// How long finished transfers stay visible
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransfersConfig {
    /// Time a completed, failed or cancelled transfer is kept after it finished
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

impl TransfersConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

impl Default for TransfersConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_eviction_interval_secs() -> u64 {
    60
}

/// Read-only progress dashboard
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: default_dashboard_enabled(),
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_dashboard_enabled() -> bool {
    true
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}
