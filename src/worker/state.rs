use parking_lot::Mutex;
use std::time::Instant;

use crate::queue::Job;

/// Live progress of one file, as last reported by the downloader
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Progress {
    pub percent: f64,
    pub downloaded_bytes: u64,
    pub last_update: Option<Instant>,
}

/// Per-job state for the lifetime of one download.
///
/// Only the progress monitor writes the progress fields, and the lock is
/// held just long enough to copy them in or out.
#[derive(Debug)]
pub struct DownloadState {
    pub file_id: i64,
    pub name: String,
    pub transfer_id: i64,
    pub start_time: Instant,
    progress: Mutex<Progress>,
}

impl DownloadState {
    pub fn new(job: &Job) -> Self {
        Self {
            file_id: job.file_id,
            name: job.name.clone(),
            transfer_id: job.transfer_id,
            start_time: Instant::now(),
            progress: Mutex::new(Progress::default()),
        }
    }

    pub fn update_progress(&self, percent: f64, downloaded_bytes: u64) {
        let mut progress = self.progress.lock();
        progress.percent = percent;
        progress.downloaded_bytes = downloaded_bytes;
        progress.last_update = Some(Instant::now());
    }

    pub fn progress(&self) -> Progress {
        *self.progress.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_updates() {
        let state = DownloadState::new(&Job::new(5, "show/e01.mkv", 2));
        assert_eq!(state.progress(), Progress::default());

        state.update_progress(42.0, 1024);
        let progress = state.progress();
        assert_eq!(progress.percent, 42.0);
        assert_eq!(progress.downloaded_bytes, 1024);
        assert!(progress.last_update.is_some());
        assert_eq!(state.name, "show/e01.mkv");
        assert_eq!(state.transfer_id, 2);
    }
}
