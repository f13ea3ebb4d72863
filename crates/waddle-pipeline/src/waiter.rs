//! Completion detection by polling directories for expected output files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;
use waddle_core::WaitPolicy;

use crate::pattern::FilePattern;

/// No matching file appeared before the deadline.
#[derive(Debug, Clone, Error)]
#[error(
    "no file matching '{pattern}' appeared within {}",
    humantime::format_duration(*.timeout)
)]
pub struct WaitTimeout {
    pub pattern: String,
    pub timeout: Duration,
    pub elapsed: Duration,
}

/// Matches found by a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// Directory the matches were found in.
    pub directory: PathBuf,
    /// Matching files, sorted by name.
    pub files: Vec<PathBuf>,
    pub elapsed: Duration,
}

/// Polls at a fixed interval up to a timeout.
///
/// Sleeps between polls and holds no lock while suspended. If a match
/// appears at elapsed time `t`, the wait returns no later than the next
/// poll; with no match it fails once the timeout has elapsed, after a final
/// check at the deadline.
#[derive(Debug, Clone, Copy)]
pub struct StageWaiter {
    policy: WaitPolicy,
}

/// Floor for the poll interval; a zero interval would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl StageWaiter {
    /// A zero poll interval is raised to [`MIN_POLL_INTERVAL`].
    pub fn new(policy: WaitPolicy) -> Self {
        Self {
            policy: WaitPolicy {
                poll_interval: policy.poll_interval.max(MIN_POLL_INTERVAL),
                ..policy
            },
        }
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub async fn wait_for_files(
        &self,
        directory: &Path,
        pattern: &FilePattern,
    ) -> Result<WaitOutcome, WaitTimeout> {
        self.wait_in(&[directory.to_path_buf()], pattern).await
    }

    /// Wait on several directories; each poll checks them in order and the
    /// first with any match wins.
    pub async fn wait_in(
        &self,
        directories: &[PathBuf],
        pattern: &FilePattern,
    ) -> Result<WaitOutcome, WaitTimeout> {
        let start = Instant::now();
        let deadline = start + self.policy.timeout;

        loop {
            for directory in directories {
                let files = matching_files(directory, pattern);
                if !files.is_empty() {
                    return Ok(WaitOutcome {
                        directory: directory.clone(),
                        files,
                        elapsed: start.elapsed(),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitTimeout {
                    pattern: pattern.to_string(),
                    timeout: self.policy.timeout,
                    elapsed: now - start,
                });
            }

            trace!(pattern = %pattern, "no match yet");
            let nap = self.policy.poll_interval.min(deadline - now);
            tokio::time::sleep(nap).await;
        }
    }
}

/// Regular files in `directory` whose names match; a missing directory has none.
fn matching_files(directory: &Path, pattern: &FilePattern) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(directory) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| pattern.matches(name))
        })
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(timeout_ms: u64, poll_ms: u64) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(poll_ms),
        )
    }

    fn write_later(path: PathBuf, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            fs::write(path, b"{}").unwrap();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_immediately_when_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), b"{}").unwrap();

        let waiter = StageWaiter::new(policy(30_000, 500));
        let out = waiter
            .wait_for_files(dir.path(), &FilePattern::new("*.json").unwrap())
            .await
            .unwrap();
        assert_eq!(out.files.len(), 1);
        assert_eq!(out.elapsed, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_within_one_poll_of_appearance() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.json", "a.json", "b.json"] {
            write_later(dir.path().join(name), Duration::from_millis(2_200));
        }

        let waiter = StageWaiter::new(policy(30_000, 500));
        let out = waiter
            .wait_for_files(dir.path(), &FilePattern::new("*.json").unwrap())
            .await
            .unwrap();

        assert!(out.elapsed >= Duration::from_millis(2_200));
        assert!(out.elapsed < Duration::from_millis(2_700));
        let names: Vec<_> = out
            .files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json", "c.json"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a match").unwrap();

        let waiter = StageWaiter::new(policy(30_000, 500));
        let started = Instant::now();
        let err = waiter
            .wait_for_files(dir.path(), &FilePattern::new("*.json").unwrap())
            .await
            .unwrap_err();

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30));
        assert!(waited < Duration::from_millis(30_500));
        assert_eq!(err.timeout, Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_not_multiple_of_poll() {
        let dir = tempfile::tempdir().unwrap();
        let waiter = StageWaiter::new(policy(1_200, 500));
        let started = Instant::now();
        waiter
            .wait_for_files(dir.path(), &FilePattern::new("*.pkl").unwrap())
            .await
            .unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_millis(1_200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_directory_with_matches_wins() {
        let scratch = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        fs::write(fallback.path().join("polynomial_coefficients.pkl"), b"old").unwrap();

        let waiter = StageWaiter::new(policy(5_000, 500));
        let pattern = FilePattern::new("polynomial_coefficients.pkl").unwrap();
        let dirs = vec![scratch.path().to_path_buf(), fallback.path().to_path_buf()];

        let out = waiter.wait_in(&dirs, &pattern).await.unwrap();
        assert_eq!(out.directory, fallback.path());

        fs::write(scratch.path().join("polynomial_coefficients.pkl"), b"new").unwrap();
        let out = waiter.wait_in(&dirs, &pattern).await.unwrap();
        assert_eq!(out.directory, scratch.path());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_poll_interval_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let waiter = StageWaiter::new(policy(20, 0));
        assert_eq!(waiter.policy().poll_interval, MIN_POLL_INTERVAL);

        let started = Instant::now();
        waiter
            .wait_for_files(dir.path(), &FilePattern::new("*.json").unwrap())
            .await
            .unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_directory_is_polled_until_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-yet");
        let waiter = StageWaiter::new(policy(1_000, 250));
        let err = waiter
            .wait_for_files(&missing, &FilePattern::new("*.onnx").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.pattern, "*.onnx");
    }
}
