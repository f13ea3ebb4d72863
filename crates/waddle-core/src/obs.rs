//! Structured observability hooks for the pipeline run lifecycle.
//!
//! Every emitter logs a fixed `event = "..."` field so runs can be followed in
//! JSON log output:
//! - `run.started` / `run.finished`
//! - `stage.started` / `stage.finished`
//! - `wait.finished`
//! - `run.published`
//! - `mirror.failed` (warn)

use tracing::{info, warn};

/// RAII guard that enters a run-scoped span for the duration of a
/// synchronous scope. Async code should use [`run_span`] with `Instrument`.
///
/// ```ignore
/// let _span = RunSpan::enter("20250101_120000_000001", "generation");
/// // every event below carries run_id and capability
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str, capability: &str) -> Self {
        Self {
            _span: run_span(run_id, capability).entered(),
        }
    }
}

/// The `waddle.run` span, for instrumenting async run futures.
pub fn run_span(run_id: &str, capability: &str) -> tracing::Span {
    tracing::info_span!("waddle.run", run_id = %run_id, capability = %capability)
}

/// Emit event: run started for a resolved entity.
pub fn emit_run_started(run_id: &str, capability: &str, internal_name: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        capability = %capability,
        internal_name = %internal_name,
    );
}

/// Emit event: an external stage is about to be launched.
pub fn emit_stage_started(run_id: &str, stage: &str, command: &str) {
    info!(event = "stage.started", run_id = %run_id, stage = %stage, command = %command);
}

/// Emit event: an external stage exited.
pub fn emit_stage_finished(run_id: &str, stage: &str, exit_code: Option<i32>, duration_ms: u64) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        exit_code = ?exit_code,
        duration_ms = duration_ms,
    );
}

/// Emit event: a completion wait ended, with or without matches.
pub fn emit_wait_finished(run_id: &str, pattern: &str, matched: usize, elapsed_ms: u64) {
    info!(
        event = "wait.finished",
        run_id = %run_id,
        pattern = %pattern,
        matched = matched,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: artifacts published and the latest alias repointed.
pub fn emit_run_published(run_id: &str, directory: &str, files: usize) {
    info!(event = "run.published", run_id = %run_id, directory = %directory, files = files);
}

/// Emit event: a mirror copy failed (warning level, never fatal).
pub fn emit_mirror_failed(run_id: &str, file_name: &str, error: &dyn std::fmt::Display) {
    warn!(event = "mirror.failed", run_id = %run_id, file_name = %file_name, error = %error);
}

/// Emit event: run finished with its final state.
pub fn emit_run_finished(run_id: &str, state: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        state = %state,
        duration_ms = duration_ms,
        success = success,
    );
}
