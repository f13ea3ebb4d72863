//! Waddle Pipeline - external stage orchestration
//!
//! Drives the generator, fitter and trainer as child processes:
//! - Runs each stage through a [`CommandRunner`]
//! - Waits for the files a stage writes after it exits
//! - Publishes the results and reports a [`PipelineOutcome`]

pub mod context;
pub mod fakes;
pub mod generation;
pub mod pattern;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod training;
pub mod waiter;

// Re-export key types
pub use generation::GenerationPipeline;
pub use pattern::FilePattern;
pub use pipeline::{FailureKind, PipelineError, PipelineOutcome, PipelineState, RunPayload};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use stage::{GenerationKind, StageTemplates};
pub use training::TrainingPipeline;
pub use waiter::{StageWaiter, WaitOutcome, WaitTimeout};
