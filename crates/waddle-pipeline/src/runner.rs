//! External stage execution.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// An external command: program, arguments and extra environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Value following `flag` in the argument list.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Shell-like rendering for logs; arguments with whitespace are quoted.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| {
                if part.is_empty() || part.chars().any(char::is_whitespace) {
                    format!("'{part}'")
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of one command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Rendered command line.
    pub command: String,
    pub working_dir: PathBuf,
    /// `None` when the process failed to launch or was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Exit status 0. The only success criterion.
    pub success: bool,
}

/// Runs an external command to completion.
///
/// Implementations never fail: launch errors come back as an unsuccessful
/// [`CommandOutput`] with the error text in `stderr`. No timeout is applied.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CommandSpec, working_dir: &Path) -> CommandOutput;
}

/// Spawns real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandSpec, working_dir: &Path) -> CommandOutput {
        let start = Instant::now();
        let rendered = command.display();
        debug!(command = %rendered, cwd = %working_dir.display(), "spawning stage process");

        let result = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(output) => CommandOutput {
                command: rendered,
                working_dir: working_dir.to_path_buf(),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms,
                success: output.status.success(),
            },
            Err(e) => CommandOutput {
                command: rendered,
                working_dir: working_dir.to_path_buf(),
                exit_code: None,
                stdout: String::new(),
                stderr: format!("failed to launch '{}': {e}", command.program),
                duration_ms,
                success: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = CommandSpec::new("uv")
            .args(["run", "--active"])
            .arg("scripts/fit_poly.py")
            .arg("/tmp/my motion.json");
        assert_eq!(
            cmd.display(),
            "uv run --active scripts/fit_poly.py '/tmp/my motion.json'"
        );
    }

    #[test]
    fn test_flag_value() {
        let cmd = CommandSpec::new("gen").args(["--duck", "bdx", "--output_dir", "/scratch"]);
        assert_eq!(cmd.flag_value("--output_dir"), Some("/scratch"));
        assert_eq!(cmd.flag_value("--name"), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessRunner
            .run(&CommandSpec::new("echo").arg("hello"), dir.path())
            .await;
        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert!(out.stdout.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_failing_command_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("sh").args(["-c", "echo partial; echo boom >&2; exit 3"]);
        let out = ProcessRunner.run(&cmd, dir.path()).await;
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.stdout.contains("partial"));
        assert!(out.stderr.contains("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stderr_on_success_is_not_failure() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("sh").args(["-c", "echo 'Installed 3 packages' >&2"]);
        let out = ProcessRunner.run(&cmd, dir.path()).await;
        assert!(out.success);
        assert!(out.stderr.contains("Installed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_working_dir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = CommandSpec::new("sh")
            .args(["-c", "echo $WADDLE_MARKER > marker.txt"])
            .env("WADDLE_MARKER", "quack");
        let out = ProcessRunner.run(&cmd, dir.path()).await;
        assert!(out.success);
        let written = std::fs::read_to_string(dir.path().join("marker.txt")).unwrap();
        assert_eq!(written.trim(), "quack");
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let out = ProcessRunner
            .run(&CommandSpec::new("definitely-not-a-real-binary-waddle"), dir.path())
            .await;
        assert!(!out.success);
        assert_eq!(out.exit_code, None);
        assert!(out.stderr.contains("failed to launch"));
    }
}
