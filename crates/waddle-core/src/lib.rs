//! Waddle Core Library
//!
//! Entity taxonomy and name resolution, run identity, artifact publishing,
//! configuration and tracing shared by the pipeline and the CLI.

pub mod config;
pub mod domain;
pub mod obs;
pub mod publish;
pub mod resolver;
pub mod telemetry;

pub use config::{ConfigError, ForgeConfig, NumEnvsBounds, WaitPolicy};

pub use domain::{
    EntityDefinition, EntityTaxonomy, ParamValue, Result, RunId, RunIdGenerator, RunLog, RunMode,
    RunRequest, VariantDefinition, VariantListing, WaddleError,
};

pub use publish::fs::FsArtifactPublisher;
pub use publish::{
    ArtifactPublisher, MirrorRule, MirrorWarning, PublishError, PublishedFile, PublishedRun,
};

pub use resolver::{NameResolver, ResolvedEntity};

pub use obs::{
    emit_mirror_failed, emit_run_finished, emit_run_published, emit_run_started,
    emit_stage_finished, emit_stage_started, emit_wait_finished, run_span, RunSpan,
};
pub use telemetry::init_tracing;

/// Waddle version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
