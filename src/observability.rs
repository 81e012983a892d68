//! Tracing setup and download counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Handle to swap the log filter of the installed subscriber
pub struct LogFilter {
    handle: reload::Handle<EnvFilter, Registry>,
    from_env: bool,
}

impl LogFilter {
    /// Switch to `directives`, e.g. once the configuration is loaded.
    /// Does nothing when `RUST_LOG` chose the filter.
    pub fn apply(&self, directives: &str) {
        if self.from_env {
            return;
        }
        if let Err(e) = self.handle.reload(EnvFilter::new(directives)) {
            tracing::warn!(error = %e, "Could not apply log filter");
        }
    }
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Returns `None` when a
/// subscriber was already installed; the second install is ignored.
pub fn init_tracing(default_filter: &str) -> Option<LogFilter> {
    let env_filter = EnvFilter::try_from_default_env().ok();
    let from_env = env_filter.is_some();
    let filter = env_filter.unwrap_or_else(|| EnvFilter::new(default_filter));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .ok()?;
    Some(LogFilter { handle, from_env })
}

/// Counters for the worker pool
#[derive(Debug, Default)]
pub struct Metrics {
    files_completed: AtomicU64,
    files_failed: AtomicU64,
    files_cancelled: AtomicU64,
    duplicates_skipped: AtomicU64,
    retries: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_completed(&self, bytes: u64) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        tracing::debug!(counter = "files_completed", bytes, "Metric incremented");
    }

    pub fn file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "files_failed", "Metric incremented");
    }

    pub fn file_cancelled(&self) {
        self.files_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "files_cancelled", "Metric incremented");
    }

    pub fn duplicate_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "duplicates_skipped", "Metric incremented");
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "retries", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_completed: self.files_completed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            files_cancelled: self.files_cancelled.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub files_completed: u64,
    pub files_failed: u64,
    pub files_cancelled: u64,
    pub duplicates_skipped: u64,
    pub retries: u64,
    pub bytes_downloaded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.file_completed(100);
        metrics.file_completed(50);
        metrics.file_failed();
        metrics.retry();
        metrics.retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_completed, 2);
        assert_eq!(snapshot.bytes_downloaded, 150);
        assert_eq!(snapshot.files_failed, 1);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.files_cancelled, 0);
    }

    #[test]
    fn test_log_filter_follows_config_unless_env_chose() {
        let (layer, handle) = reload::Layer::<EnvFilter, Registry>::new(EnvFilter::new("info"));
        let _subscriber = tracing_subscriber::registry().with(layer);
        let current = || handle.with_current(|filter| filter.to_string()).unwrap();

        let configured = LogFilter {
            handle: handle.clone(),
            from_env: false,
        };
        configured.apply("transferd=debug");
        assert!(current().contains("transferd"), "{}", current());

        let pinned = LogFilter {
            handle: handle.clone(),
            from_env: true,
        };
        pinned.apply("warn");
        assert!(current().contains("transferd"), "{}", current());
    }
}
