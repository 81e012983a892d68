//! Downloader output parsing and progress tracking
//!
//! The downloader prints one readout per line while it works:
//!
//! ```text
//! [#<gid> SIZE:<done>/<total>(<percent>%) CN:<connections> DL:<speed><unit> ETA:<eta>]
//! [#1 SIZE:1.2GiB/10.5GiB(11%) CN:16 DL:45.2MiB ETA:3m12s]
//! ```
//!
//! - `SIZE:` may be missing; `done` and `total` are sizes such as `0B`,
//!   `900KiB` or `1.2GiB`
//! - `CN:` and `ETA:` are optional (ETA is absent while the rate is unknown)
//! - the speed unit is one of `B`, `KiB`, `MiB`, `GiB` and is normalized to
//!   MB/s (MiB per second)
//!
//! Anything else is ordinary log output. Lines carrying a failure marker are
//! surfaced as diagnostics. On failure the downloader also prints a results
//! table and a generic trailer that mentions errors, so the lines naming an
//! `errorCode=` or an HTTP `status=` are what gets reported.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::state::DownloadState;
use crate::humanize::ByteSize;

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[#\w+\s+(?:SIZE:)?(?P<done>[\d.]+[KMGT]?i?B)/(?P<total>[\d.]+[KMGT]?i?B)\((?P<pct>\d+(?:\.\d+)?)%\)(?:\s+CN:(?P<cn>\d+))?.*?\sDL:(?P<speed>[\d.]+)(?P<unit>[KMG]iB|B)(?:.*?\sETA:(?P<eta>[^\]\s]+))?[^\]]*\]",
    )
    .expect("progress pattern is valid")
});

const FAILURE_MARKERS: &[&str] = &["Exception", "error", "ERROR", "failed"];

/// Markers of the lines that say what actually went wrong
const CAUSE_MARKERS: &[&str] = &["errorCode=", "status="];

const MAX_DIAGNOSTICS: usize = 16;

/// How long to keep reading buffered output after the process exited
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// One parsed progress readout
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub percent: f64,
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub connections: Option<u32>,
    pub speed_mbps: f64,
    pub eta: Option<String>,
}

/// Parse a progress readout. Returns `None` for any other line.
pub fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let caps = PROGRESS_LINE.captures(line)?;

    let percent: f64 = caps.name("pct")?.as_str().parse().ok()?;
    let speed: f64 = caps.name("speed")?.as_str().parse().ok()?;
    let unit = caps.name("unit")?.as_str();

    let size = |name: &str| {
        caps.name(name)
            .and_then(|m| m.as_str().parse::<ByteSize>().ok())
            .map(|size| size.as_u64())
    };

    Some(ProgressLine {
        percent,
        downloaded_bytes: size("done"),
        total_bytes: size("total"),
        connections: caps.name("cn").and_then(|m| m.as_str().parse().ok()),
        speed_mbps: speed_to_mbps(speed, unit),
        eta: caps.name("eta").map(|m| m.as_str().to_string()),
    })
}

/// Convert a downloader speed readout to MB/s.
pub fn speed_to_mbps(value: f64, unit: &str) -> f64 {
    match unit {
        "B" => value / 1024.0 / 1024.0,
        "KiB" => value / 1024.0,
        "GiB" => value * 1024.0,
        _ => value,
    }
}

pub fn is_failure_output(line: &str) -> bool {
    FAILURE_MARKERS.iter().any(|marker| line.contains(marker))
}

fn names_cause(line: &str) -> bool {
    CAUSE_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Emits at most one progress log per interval, and only when the
/// percentage moved.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last_log: Instant,
    last_percent: f64,
}

impl LogThrottle {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_log: now,
            last_percent: 0.0,
        }
    }

    pub fn should_log(&mut self, now: Instant, percent: f64) -> bool {
        if now.duration_since(self.last_log) < self.interval || percent == self.last_percent {
            return false;
        }
        self.last_log = now;
        self.last_percent = percent;
        true
    }
}

/// Follows the downloader's output for one job
pub struct ProgressMonitor {
    state: Arc<DownloadState>,
    throttle: LogThrottle,
    diagnostics: VecDeque<String>,
}

impl ProgressMonitor {
    pub fn new(state: Arc<DownloadState>, interval: Duration) -> Self {
        Self {
            state,
            throttle: LogThrottle::new(interval, Instant::now()),
            diagnostics: VecDeque::with_capacity(MAX_DIAGNOSTICS),
        }
    }

    /// Best description of the failure seen so far: every retained line
    /// naming an error code or status, or else the last diagnostic.
    pub fn failure_detail(&self) -> Option<String> {
        let causes: Vec<&str> = self
            .diagnostics
            .iter()
            .map(String::as_str)
            .filter(|line| names_cause(line))
            .collect();
        if causes.is_empty() {
            self.diagnostics.back().cloned()
        } else {
            Some(causes.join(" | "))
        }
    }

    /// Read stdout and stderr until both close, `cancel` fires, or `done`
    /// fires and the remaining buffered output has been drained.
    ///
    /// Returns the [failure detail](Self::failure_detail), if any.
    pub async fn run<O, E>(
        mut self,
        stdout: O,
        stderr: E,
        done: CancellationToken,
        cancel: CancellationToken,
    ) -> Option<String>
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let mut out = BufReader::new(stdout).split(b'\n');
        let mut err = BufReader::new(stderr).split(b'\n');
        let mut out_open = true;
        let mut err_open = true;
        let mut drain_until: Option<Instant> = None;

        while out_open || err_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = out.next_segment(), if out_open => match chunk {
                    Ok(Some(bytes)) => self.handle_output(&String::from_utf8_lossy(&bytes)),
                    _ => out_open = false,
                },
                chunk = err.next_segment(), if err_open => match chunk {
                    Ok(Some(bytes)) => self.handle_output(&String::from_utf8_lossy(&bytes)),
                    _ => err_open = false,
                },
                _ = done.cancelled(), if drain_until.is_none() => {
                    drain_until = Some(Instant::now() + DRAIN_GRACE);
                }
                _ = tokio::time::sleep_until(drain_until.unwrap_or_else(Instant::now)), if drain_until.is_some() => break,
            }
        }

        self.failure_detail()
    }

    /// Handle one line of output. Progress readouts may be separated by
    /// carriage returns instead of newlines.
    pub fn handle_output(&mut self, line: &str) {
        for segment in line.split('\r').map(str::trim).filter(|s| !s.is_empty()) {
            self.handle_segment(segment);
        }
    }

    fn handle_segment(&mut self, segment: &str) {
        if let Some(progress) = parse_progress_line(segment) {
            self.state
                .update_progress(progress.percent, progress.downloaded_bytes.unwrap_or(0));

            if self.throttle.should_log(Instant::now(), progress.percent) {
                info!(
                    file_name = %self.state.name,
                    progress_percent = progress.percent,
                    speed_mbps = progress.speed_mbps,
                    eta = progress.eta.as_deref().unwrap_or("unknown"),
                    "Download progress"
                );
            }
        } else if is_failure_output(segment) {
            error!(
                file_name = %self.state.name,
                downloader_output = segment,
                "Downloader error output"
            );
            if self.diagnostics.len() == MAX_DIAGNOSTICS {
                // Keep cause lines over the trailer noise that follows them
                match self.diagnostics.iter().position(|line| !names_cause(line)) {
                    Some(index) => {
                        self.diagnostics.remove(index);
                    }
                    None => {
                        self.diagnostics.pop_front();
                    }
                }
            }
            self.diagnostics.push_back(segment.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::{GIB, KIB};
    use crate::queue::Job;

    fn state() -> Arc<DownloadState> {
        Arc::new(DownloadState::new(&Job::new(1, "movie.mkv", 1)))
    }

    #[test]
    fn test_parse_reference_line() {
        let parsed =
            parse_progress_line("[#1 SIZE:1.2GiB/10.5GiB(11%) CN:16 DL:45.2MiB ETA:3m12s]").unwrap();

        assert_eq!(parsed.percent, 11.0);
        assert_eq!(parsed.speed_mbps, 45.2);
        assert_eq!(parsed.eta.as_deref(), Some("3m12s"));
        assert_eq!(parsed.connections, Some(16));
        assert_eq!(parsed.total_bytes, Some((10.5 * GIB as f64) as u64));
        assert_eq!(parsed.downloaded_bytes, Some((1.2 * GIB as f64).round() as u64));
    }

    #[test]
    fn test_kib_speed_normalized() {
        let parsed =
            parse_progress_line("[#2 SIZE:12MiB/100MiB(12%) CN:4 DL:900KiB ETA:1m40s]").unwrap();
        assert!((parsed.speed_mbps - 0.879).abs() < 0.001);
    }

    #[test]
    fn test_other_units_and_optional_fields() {
        let parsed = parse_progress_line("[#a1b2c3 0B/2.0GiB(0%) CN:1 DL:0B]").unwrap();
        assert_eq!(parsed.percent, 0.0);
        assert_eq!(parsed.speed_mbps, 0.0);
        assert_eq!(parsed.eta, None);
        assert_eq!(parsed.downloaded_bytes, Some(0));

        let parsed = parse_progress_line("[#1 SIZE:5GiB/8GiB(62%) DL:1.5GiB ETA:2s]").unwrap();
        assert_eq!(parsed.speed_mbps, 1536.0);
        assert_eq!(parsed.connections, None);
    }

    #[test]
    fn test_non_progress_lines() {
        assert_eq!(parse_progress_line(""), None);
        assert_eq!(parse_progress_line("Download complete: /srv/a.mkv"), None);
        assert_eq!(parse_progress_line("[#1 SIZE:0B/0B CN:1 DL:0B]"), None);
    }

    #[test]
    fn test_speed_units() {
        assert_eq!(speed_to_mbps(2048.0, "KiB"), 2.0);
        assert_eq!(speed_to_mbps(3.0, "MiB"), 3.0);
        assert_eq!(speed_to_mbps(1.0, "GiB"), 1024.0);
        assert_eq!(speed_to_mbps(1048576.0, "B"), 1.0);
    }

    #[test]
    fn test_failure_markers() {
        assert!(is_failure_output("Exception caught"));
        assert!(is_failure_output("errorCode=3 Resource not found"));
        assert!(is_failure_output("ERROR: disk full"));
        assert!(is_failure_output("Download failed"));
        assert!(!is_failure_output("Download complete"));
    }

    #[test]
    fn test_throttle_needs_interval_and_change() {
        let start = Instant::now();
        let mut throttle = LogThrottle::new(Duration::from_secs(5), start);

        assert!(!throttle.should_log(start + Duration::from_secs(1), 10.0));
        assert!(throttle.should_log(start + Duration::from_secs(5), 10.0));
        // Same percentage, interval elapsed
        assert!(!throttle.should_log(start + Duration::from_secs(11), 10.0));
        // Changed percentage, interval not elapsed
        assert!(!throttle.should_log(start + Duration::from_secs(7), 20.0));
        assert!(throttle.should_log(start + Duration::from_secs(12), 20.0));
    }

    #[test]
    fn test_handle_output_updates_state_and_keeps_diagnostics() {
        let state = state();
        let mut monitor = ProgressMonitor::new(state.clone(), Duration::from_secs(5));

        monitor.handle_output("[#1 SIZE:1MiB/4MiB(25%) CN:16 DL:1MiB ETA:3s]\r[#1 SIZE:2MiB/4MiB(50%) CN:16 DL:1MiB ETA:2s]");
        let progress = state.progress();
        assert_eq!(progress.percent, 50.0);
        assert_eq!(progress.downloaded_bytes, 2048 * KIB);

        assert_eq!(monitor.failure_detail(), None);
        monitor.handle_output("ERROR: disk full");
        assert_eq!(monitor.failure_detail().as_deref(), Some("ERROR: disk full"));
        monitor.handle_output("Exception: errorCode=22 status=503");
        assert_eq!(monitor.failure_detail().as_deref(), Some("Exception: errorCode=22 status=503"));
    }

    /// What aria2c prints when the server answers 503
    const UNAVAILABLE_TRANSCRIPT: &str = "\
[#2089b0 0B/0B CN:1 DL:0B]
10/18 12:00:01 [ERROR] CUID#7 - Download aborted. URI=https://cdn.example/a.mkv
Exception: [AbstractCommand.cc:351] errorCode=22 URI=https://cdn.example/a.mkv
  -> [HttpSkipResponseCommand.cc:218] errorCode=22 The response status is not successful. status=503

Download Results:
gid   |stat|avg speed  |path/URI
======+====+===========+=======================================================
2089b0|ERR |       0B/s|/srv/downloads/a.mkv

Status Legend:
(ERR):error occurred.

aria2 will resume download if the transfer is restarted.
If there are any errors, then see the log file. See '-l' option in help/man page for details.
";

    #[test]
    fn test_status_survives_downloader_trailer() {
        let mut monitor = ProgressMonitor::new(state(), Duration::from_secs(5));
        for line in UNAVAILABLE_TRANSCRIPT.lines() {
            monitor.handle_output(line);
        }

        let detail = monitor.failure_detail().unwrap();
        assert!(detail.contains("status=503"), "{detail}");
        assert!(!detail.contains("see the log file"), "{detail}");

        let err = crate::worker::DownloadError::Process {
            status: "exit status: 22".to_string(),
            code: Some(22),
            detail: Some(detail),
        };
        assert!(crate::worker::is_transient(&err));
    }

    #[test]
    fn test_diagnostics_are_bounded_and_keep_causes() {
        let mut monitor = ProgressMonitor::new(state(), Duration::from_secs(5));
        monitor.handle_output("Exception: errorCode=6 Network problem");
        for i in 0..100 {
            monitor.handle_output(&format!("ERROR: noise {i}"));
        }

        assert_eq!(monitor.diagnostics.len(), MAX_DIAGNOSTICS);
        assert_eq!(
            monitor.failure_detail().as_deref(),
            Some("Exception: errorCode=6 Network problem")
        );
        assert_eq!(monitor.diagnostics.back().map(String::as_str), Some("ERROR: noise 99"));
    }

    #[tokio::test]
    async fn test_run_reads_both_streams_to_eof() {
        let state = state();
        let monitor = ProgressMonitor::new(state.clone(), Duration::from_secs(5));

        let stdout: &[u8] = b"starting\n[#1 SIZE:3MiB/4MiB(75%) CN:8 DL:2MiB ETA:1s]\n";
        let stderr: &[u8] = b"ERROR: checksum mismatch\n";

        let detail = monitor
            .run(stdout, stderr, CancellationToken::new(), CancellationToken::new())
            .await;

        assert_eq!(detail.as_deref(), Some("ERROR: checksum mismatch"));
        assert_eq!(state.progress().percent, 75.0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (_stdout_tx, stdout) = tokio::io::duplex(64);
        let (_stderr_tx, stderr) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let monitor = ProgressMonitor::new(state(), Duration::from_secs(5));
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            monitor.run(stdout, stderr, CancellationToken::new(), cancel),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_after_done_grace() {
        // Writers stay open, so only the done signal can end the loop
        let (_stdout_tx, stdout) = tokio::io::duplex(64);
        let (_stderr_tx, stderr) = tokio::io::duplex(64);
        let done = CancellationToken::new();
        done.cancel();

        let monitor = ProgressMonitor::new(state(), Duration::from_secs(5));
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            monitor.run(stdout, stderr, done, CancellationToken::new()),
        )
        .await;
        assert!(result.is_ok());
    }
}
