//! Retry policy and transient-error classification

use regex::Regex;
use std::future::Future;
use std::io::ErrorKind;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error::DownloadError;

const TRANSIENT_MARKERS: &[&str] = &["connection reset", "connection refused", "i/o timeout"];

/// Too Many Requests, Bad Gateway, Service Unavailable, Gateway Timeout
static TRANSIENT_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(429|502|503|504)\b").expect("status pattern is valid"));

/// aria2c exit codes for a timeout, a network problem and an overloaded
/// or maintenance-mode server
const TRANSIENT_EXIT_CODES: &[i32] = &[2, 6, 29];

/// Decides whether a failed attempt is worth another try
pub trait ErrorClassifier: Send + Sync {
    fn is_transient(&self, err: &DownloadError) -> bool;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&DownloadError) -> bool + Send + Sync,
{
    fn is_transient(&self, err: &DownloadError) -> bool {
        self(err)
    }
}

/// The default classifier, backed by [`is_transient`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientErrorClassifier;

impl ErrorClassifier for TransientErrorClassifier {
    fn is_transient(&self, err: &DownloadError) -> bool {
        is_transient(err)
    }
}

/// Network resets, refused connections, timeouts and HTTP 429/502/503/504
/// are transient, as are the downloader's own network, timeout and
/// overload exit codes. Cancellation and everything else is not.
pub fn is_transient(err: &DownloadError) -> bool {
    match err {
        DownloadError::Cancelled(_)
        | DownloadError::Permanent { .. }
        | DownloadError::Exhausted { .. } => false,
        DownloadError::Process { code: Some(code), .. } if TRANSIENT_EXIT_CODES.contains(code) => true,
        _ => {
            if let Some(io) = err.io_error() {
                if matches!(
                    io.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused | ErrorKind::TimedOut
                ) {
                    return true;
                }
            }

            let text = err.to_string().to_lowercase();
            TRANSIENT_MARKERS.iter().any(|marker| text.contains(marker))
                || TRANSIENT_STATUS.is_match(&text)
        }
    }
}

/// Delay before the next attempt, given the attempt that just failed
pub type Backoff = fn(u32) -> Duration;

/// 1s after the first failure, 2s after the second, and so on.
pub fn linear_backoff(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt))
}

/// Bounded retry with a pluggable backoff
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: linear_backoff,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Cancellation, whether it
    /// comes back from `op` or fires during a backoff sleep, ends the loop
    /// at once with [`DownloadError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        classifier: &dyn ErrorClassifier,
        mut op: F,
    ) -> Result<T, DownloadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled(label.to_string()));
            }

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_cancelled() => return Err(err),
                // Whatever failed after shutdown fired is fallout of the kill
                Err(_) if cancel.is_cancelled() => {
                    return Err(DownloadError::Cancelled(label.to_string()));
                }
                Err(err) => err,
            };

            if !classifier.is_transient(&err) {
                return Err(DownloadError::Permanent {
                    attempt,
                    source: Box::new(err),
                });
            }

            // No backoff after the final attempt, nothing follows it
            if attempt >= self.max_attempts {
                return Err(DownloadError::Exhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = (self.backoff)(attempt);
            warn!(
                file_name = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying download after error"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled(label.to_string())),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostError;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn process_error(detail: &str) -> DownloadError {
        DownloadError::Process {
            status: "exit status: 1".to_string(),
            code: Some(1),
            detail: Some(detail.to_string()),
        }
    }

    fn exit_code(code: i32) -> DownloadError {
        DownloadError::Process {
            status: format!("exit status: {code}"),
            code: Some(code),
            detail: None,
        }
    }

    fn no_delay(_: u32) -> Duration {
        Duration::ZERO
    }

    #[test]
    fn test_transient_markers() {
        assert!(is_transient(&process_error("connection reset by peer")));
        assert!(is_transient(&process_error("Connection refused")));
        assert!(is_transient(&process_error("read tcp: i/o timeout")));
        assert!(is_transient(&process_error("errorCode=22 status=503")));
        assert!(is_transient(&process_error("HTTP 429 Too Many Requests")));
        assert!(is_transient(&process_error("502 Bad Gateway")));
        assert!(is_transient(&process_error("504 Gateway Timeout")));
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!is_transient(&process_error("errorCode=3 Resource not found")));
        assert!(!is_transient(&process_error("status=404")));
        // Status codes only count as whole numbers
        assert!(!is_transient(&process_error("file_5030.bin")));
        assert!(!is_transient(&DownloadError::Url(HostError::UnknownFile(1))));
        assert!(!is_transient(&DownloadError::Cancelled("x".to_string())));
    }

    #[test]
    fn test_downloader_exit_codes() {
        assert!(is_transient(&exit_code(2)));
        assert!(is_transient(&exit_code(6)));
        assert!(is_transient(&exit_code(29)));
        assert!(!is_transient(&exit_code(3)));
        assert!(!is_transient(&exit_code(22)));
        let killed = DownloadError::Process {
            status: "signal: 9 (SIGKILL)".to_string(),
            code: None,
            detail: None,
        };
        assert!(!is_transient(&killed));
    }

    #[test]
    fn test_io_kinds() {
        let reset = DownloadError::Spawn(io::Error::from(io::ErrorKind::ConnectionReset));
        let denied = DownloadError::Spawn(io::Error::from(io::ErrorKind::PermissionDenied));
        let timeout = DownloadError::Verify(io::Error::from(io::ErrorKind::TimedOut));
        assert!(is_transient(&reset));
        assert!(is_transient(&timeout));
        assert!(!is_transient(&denied));
    }

    #[test]
    fn test_linear_backoff() {
        assert_eq!(linear_backoff(1), Duration::from_secs(1));
        assert_eq!(linear_backoff(2), Duration::from_secs(2));
        assert_eq!(linear_backoff(3), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_transient_errors_then_success() {
        let policy = RetryPolicy::new(3).with_backoff(no_delay);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = policy
            .run("f", &cancel, &TransientErrorClassifier, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(process_error("status=503"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_wraps_last_error() {
        let policy = RetryPolicy::new(3).with_backoff(no_delay);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = policy
            .run("f", &cancel, &TransientErrorClassifier, |attempt| async move {
                Err(process_error(&format!("connection reset #{attempt}")))
            })
            .await;

        let err = result.unwrap_err();
        match &err {
            DownloadError::Exhausted { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert!(source.to_string().contains("connection reset #3"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("failed after 3 attempts, last error:"));
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        for failing_attempt in 1..=3 {
            let policy = RetryPolicy::new(3).with_backoff(no_delay);
            let cancel = CancellationToken::new();
            let calls = AtomicU32::new(0);

            let result: Result<(), _> = policy
                .run("f", &cancel, &TransientErrorClassifier, |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt == failing_attempt {
                            Err(process_error("errorCode=3 Resource not found"))
                        } else {
                            Err(process_error("status=502"))
                        }
                    }
                })
                .await;

            assert!(matches!(
                result,
                Err(DownloadError::Permanent { attempt, .. }) if attempt == failing_attempt
            ));
            assert_eq!(calls.load(Ordering::SeqCst), failing_attempt);
        }
    }

    #[tokio::test]
    async fn test_injected_classifier() {
        let policy = RetryPolicy::new(5).with_backoff(no_delay);
        let cancel = CancellationToken::new();
        let seen = Mutex::new(Vec::new());
        let always_retry = |_: &DownloadError| true;

        let result: Result<(), _> = policy
            .run("f", &cancel, &always_retry, |attempt| {
                seen.lock().unwrap().push(attempt);
                async move { Err(process_error("errorCode=3")) }
            })
            .await;

        assert!(matches!(result, Err(DownloadError::Exhausted { attempts: 5, .. })));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy::new(3).with_backoff(|_| Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = tokio::time::timeout(
            Duration::from_secs(5),
            policy.run("f", &cancel, &TransientErrorClassifier, |_| async {
                Err(process_error("status=503"))
            }),
        )
        .await
        .expect("cancellation must cut the backoff short");

        assert!(matches!(result, Err(DownloadError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run("f", &cancel, &TransientErrorClassifier, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(DownloadError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_after_cancel_is_reported_as_cancelled() {
        let policy = RetryPolicy::new(3).with_backoff(no_delay);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        for failure in ["errorCode=3 Resource not found", "status=503"] {
            let result: Result<(), _> = policy
                .run("f", &cancel, &TransientErrorClassifier, |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // The kill lands mid-attempt, so the attempt fails on its own terms
                    cancel.cancel();
                    async move { Err(process_error(failure)) }
                })
                .await;
            assert!(matches!(result, Err(DownloadError::Cancelled(_))), "{failure}: {result:?}");
        }
        // The first run stopped after one attempt, the second never started
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_error_is_not_wrapped() {
        let policy = RetryPolicy::new(3).with_backoff(no_delay);
        let cancel = CancellationToken::new();

        let result: Result<(), _> = policy
            .run("f", &cancel, &TransientErrorClassifier, |_| async {
                Err(DownloadError::Cancelled("f".to_string()))
            })
            .await;
        assert!(matches!(result, Err(DownloadError::Cancelled(_))));
    }
}
