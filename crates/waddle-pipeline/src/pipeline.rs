//! Shared orchestration plumbing: run states, failures, outcomes and the
//! run-a-stage / await-outputs steps both capabilities are built from.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use waddle_core::{obs, PublishError, PublishedRun, WaddleError};

use crate::context::RunContext;
use crate::pattern::FilePattern;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::waiter::{StageWaiter, WaitOutcome, WaitTimeout};

/// Per-run state machine. Every non-terminal state can move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Init,
    Generating,
    AwaitingGenerated,
    PostProcessing,
    AwaitingProcessed,
    Training,
    AwaitingModel,
    Publishing,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Init => "INIT",
            PipelineState::Generating => "GENERATING",
            PipelineState::AwaitingGenerated => "AWAITING_GENERATED",
            PipelineState::PostProcessing => "POST_PROCESSING",
            PipelineState::AwaitingProcessed => "AWAITING_PROCESSED",
            PipelineState::Training => "TRAINING",
            PipelineState::AwaitingModel => "AWAITING_MODEL",
            PipelineState::Publishing => "PUBLISHING",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Resolution,
    InvalidParameter,
    Command,
    Timeout,
    Publish,
    Scratch,
}

/// Why a run stopped. None of these are retried.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolution(#[from] WaddleError),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{stage} stage {}: {command}", describe_exit(.exit_code))]
    Command {
        stage: String,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{message}")]
    Timeout {
        message: String,
        #[source]
        source: WaitTimeout,
    },

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("could not create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Resolution(_) => FailureKind::Resolution,
            PipelineError::InvalidParameter { .. } => FailureKind::InvalidParameter,
            PipelineError::Command { .. } => FailureKind::Command,
            PipelineError::Timeout { .. } => FailureKind::Timeout,
            PipelineError::Publish(_) => FailureKind::Publish,
            PipelineError::Scratch(_) => FailureKind::Scratch,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "did not run to completion".to_string(),
    }
}

/// Data returned with every outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunPayload {
    pub run_id: String,
    /// Joined execution trace.
    pub output: String,
    /// Names of the published files.
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<serde_json::Value>,
}

/// Result of one orchestrated run, success or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub success: bool,
    pub message: String,
    /// Final state: `Done` or `Failed`.
    pub state: PipelineState,
    /// State the run was in when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<PipelineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub payload: RunPayload,
}

/// What a capability hands back after a successful publish.
#[derive(Debug, Clone)]
pub(crate) struct Completed {
    pub published: PublishedRun,
    pub preview: Option<serde_json::Value>,
}

/// Run one external stage and record it in the run log.
///
/// stdout is logged under `<label> Output`. stderr of a successful stage
/// goes under `<label> Diagnostics`; a failing stage logs it under
/// `<label> Errors` and aborts the run.
pub(crate) async fn run_stage(
    runner: &dyn CommandRunner,
    ctx: &mut RunContext,
    stage: &str,
    label: &str,
    command: &CommandSpec,
    working_dir: &Path,
) -> Result<CommandOutput, PipelineError> {
    let rendered = command.display();
    ctx.log.push(format!("Running command: {rendered}"));
    ctx.log.push(format!("Working directory: {}", working_dir.display()));
    obs::emit_stage_started(ctx.run_id.as_str(), stage, &rendered);

    let output = runner.run(command, working_dir).await;
    obs::emit_stage_finished(ctx.run_id.as_str(), stage, output.exit_code, output.duration_ms);

    ctx.log.section(&format!("{label} Output"), &output.stdout);
    if output.success {
        ctx.log.section(&format!("{label} Diagnostics"), &output.stderr);
        return Ok(output);
    }

    ctx.log.section(&format!("{label} Errors"), &output.stderr);
    Err(PipelineError::Command {
        stage: stage.to_string(),
        command: output.command,
        exit_code: output.exit_code,
        stderr: output.stderr,
    })
}

/// Wait for a stage's outputs; a timeout becomes a failure with `timeout_message`.
pub(crate) async fn await_outputs(
    waiter: &StageWaiter,
    ctx: &mut RunContext,
    directories: &[PathBuf],
    pattern: &FilePattern,
    timeout_message: &str,
) -> Result<WaitOutcome, PipelineError> {
    match waiter.wait_in(directories, pattern).await {
        Ok(found) => {
            obs::emit_wait_finished(
                ctx.run_id.as_str(),
                pattern.as_str(),
                found.files.len(),
                found.elapsed.as_millis() as u64,
            );
            ctx.log.push(format!(
                "Found {} file(s) matching {} in {} after {}",
                found.files.len(),
                pattern,
                found.directory.display(),
                humantime::format_duration(found.elapsed)
            ));
            Ok(found)
        }
        Err(timeout) => {
            obs::emit_wait_finished(
                ctx.run_id.as_str(),
                pattern.as_str(),
                0,
                timeout.elapsed.as_millis() as u64,
            );
            let message = format!(
                "{timeout_message} after waiting {}",
                humantime::format_duration(timeout.timeout)
            );
            info!(run_id = %ctx.run_id, pattern = %pattern, "stage output wait timed out");
            Err(PipelineError::Timeout {
                message,
                source: timeout,
            })
        }
    }
}

/// Parsed JSON of `path` when it is valid JSON no larger than 1 MiB.
pub(crate) fn json_preview(path: &Path) -> Option<serde_json::Value> {
    const PREVIEW_LIMIT: u64 = 1024 * 1024;
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > PREVIEW_LIMIT {
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
