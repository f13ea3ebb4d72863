//! Per-run ephemeral state: id, scratch directory, trace and current state.

use std::path::Path;
use std::time::Instant;

use tempfile::TempDir;
use tracing::debug;
use waddle_core::{obs, RunId, RunLog};

use crate::pipeline::{Completed, PipelineError, PipelineOutcome, PipelineState, RunPayload};

/// Owns the run's scratch directory, which is removed when the context is
/// dropped on every exit path.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: RunId,
    pub log: RunLog,
    scratch: TempDir,
    state: PipelineState,
    warnings: Vec<String>,
    started: Instant,
}

impl RunContext {
    /// Create `<prefix>_<run_id>_*` in the system temp dir, with `log/` and
    /// `tmp/` inside.
    pub fn create(run_id: RunId, prefix: &str) -> Result<Self, PipelineError> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{prefix}_{run_id}_"))
            .tempdir()
            .map_err(PipelineError::Scratch)?;
        for sub in ["log", "tmp"] {
            std::fs::create_dir_all(scratch.path().join(sub)).map_err(PipelineError::Scratch)?;
        }
        debug!(run_id = %run_id, scratch = %scratch.path().display(), "scratch directory created");

        Ok(Self {
            run_id,
            log: RunLog::new(),
            scratch,
            state: PipelineState::Init,
            warnings: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn transition(&mut self, next: PipelineState) {
        debug!(run_id = %self.run_id, from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    /// Record a non-fatal problem in the trace and the outcome.
    pub fn warn(&mut self, message: String) {
        self.log.warning(&message);
        self.warnings.push(message);
    }

    /// Close the run. Consumes the context, removing the scratch directory.
    pub(crate) fn finish(
        mut self,
        result: Result<Completed, PipelineError>,
        success_message: &str,
        failure_prefix: &str,
    ) -> PipelineOutcome {
        let mut payload = RunPayload {
            run_id: self.run_id.to_string(),
            ..RunPayload::default()
        };

        let mut outcome = match result {
            Ok(done) => {
                self.transition(PipelineState::Done);
                payload.files = done.published.file_names();
                payload.published_dir = Some(done.published.directory);
                payload.preview = done.preview;
                PipelineOutcome {
                    success: true,
                    message: success_message.to_string(),
                    state: PipelineState::Done,
                    failed_at: None,
                    failure: None,
                    payload,
                }
            }
            Err(err) => {
                let failed_at = self.state;
                self.transition(PipelineState::Failed);
                let message = match &err {
                    PipelineError::Timeout { message, .. } => message.clone(),
                    other => format!("{failure_prefix}: {other}"),
                };
                self.log.push(message.clone());
                if let PipelineError::Command {
                    command, stderr, ..
                } = &err
                {
                    payload.failed_command = Some(command.clone());
                    payload.stderr = Some(stderr.clone());
                }
                PipelineOutcome {
                    success: false,
                    message,
                    state: PipelineState::Failed,
                    failed_at: Some(failed_at),
                    failure: Some(err.kind()),
                    payload,
                }
            }
        };

        outcome.payload.output = self.log.joined();
        outcome.payload.warnings = std::mem::take(&mut self.warnings);
        obs::emit_run_finished(
            self.run_id.as_str(),
            outcome.state.as_str(),
            self.started.elapsed().as_millis() as u64,
            outcome.success,
        );
        outcome
    }
}

/// Outcome for a run whose scratch directory could not be created.
pub(crate) fn scratch_failure(
    run_id: &RunId,
    err: PipelineError,
    failure_prefix: &str,
) -> PipelineOutcome {
    let message = format!("{failure_prefix}: {err}");
    obs::emit_run_finished(run_id.as_str(), PipelineState::Failed.as_str(), 0, false);
    PipelineOutcome {
        success: false,
        message: message.clone(),
        state: PipelineState::Failed,
        failed_at: Some(PipelineState::Init),
        failure: Some(err.kind()),
        payload: RunPayload {
            run_id: run_id.to_string(),
            output: message,
            ..RunPayload::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_layout_and_cleanup() {
        let ctx = RunContext::create(RunId::new("20250101_000000_000000"), "motion_gen").unwrap();
        let scratch = ctx.scratch_dir().to_path_buf();
        let name = scratch.file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with("motion_gen_20250101_000000_000000_"));
        assert!(scratch.join("log").is_dir());
        assert!(scratch.join("tmp").is_dir());

        let outcome = ctx.finish(
            Err(PipelineError::InvalidParameter {
                name: "num_envs".into(),
                reason: "out of range".into(),
            }),
            "ok",
            "Training failed",
        );
        assert!(!scratch.exists());
        assert!(!outcome.success);
        assert_eq!(outcome.failed_at, Some(PipelineState::Init));
        assert_eq!(
            outcome.message,
            "Training failed: invalid parameter 'num_envs': out of range"
        );
        assert!(outcome.payload.output.ends_with("out of range"));
    }

    #[test]
    fn test_warnings_reach_outcome_and_log() {
        let mut ctx = RunContext::create(RunId::new("r"), "training").unwrap();
        ctx.warn("Error copying a to b: denied".to_string());
        let outcome = ctx.finish(
            Err(PipelineError::Scratch(std::io::Error::other("x"))),
            "ok",
            "Motion generation failed",
        );
        assert_eq!(outcome.payload.warnings, vec!["Error copying a to b: denied"]);
        assert!(outcome.payload.output.contains("Warning: Error copying a to b: denied"));
    }
}
