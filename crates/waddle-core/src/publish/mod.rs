//! Versioned artifact publishing.
//!
//! Layout under a publish root:
//!
//! ```text
//! <root>/<entity_type>/<variant>/<run_id>/<files...>
//! <root>/<entity_type>/<variant>/latest_<variant> -> <run_id>
//! ```

pub mod fs;

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::RunId;
use crate::resolver::ResolvedEntity;

/// One file inside a published run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub name: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the file content.
    pub sha256: String,
}

/// An immutable, published run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedRun {
    pub run_id: RunId,
    pub entity_type: String,
    pub variant: String,
    pub directory: PathBuf,
    /// Files sorted by name.
    pub files: Vec<PublishedFile>,
    /// Creation time, decoded from the run id.
    pub created_at: Option<DateTime<Utc>>,
}

impl PublishedRun {
    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }

    /// Absolute path of a published file, if the run contains it.
    pub fn file_path(&self, name: &str) -> Option<PathBuf> {
        self.files
            .iter()
            .any(|f| f.name == name)
            .then(|| self.directory.join(name))
    }
}

/// Errors from publishing or reading published runs.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid {kind} '{value}': must be a single non-empty path component")]
    InvalidComponent { kind: &'static str, value: String },

    #[error("run directory already exists: {0}")]
    RunExists(PathBuf),

    #[error("duplicate file name in publish set: {0}")]
    DuplicateFile(String),

    #[error("source file missing or not a regular file: {0}")]
    MissingSource(PathBuf),

    #[error("copy of '{0}' does not match its source")]
    VerificationFailed(String),

    #[error("nothing published yet for {entity_type}/{variant}")]
    NotFound { entity_type: String, variant: String },

    #[error("run {run_id} not found for {entity_type}/{variant}")]
    RunNotFound {
        entity_type: String,
        variant: String,
        run_id: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Copies one published file to a fixed downstream location.
///
/// `destination` is a path template; `{entity_type}`, `{variant}`,
/// `{internal_name}` and `{file_name}` are substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRule {
    pub file_name: String,
    pub destination: String,
}

impl MirrorRule {
    pub fn new(file_name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            destination: destination.into(),
        }
    }

    pub fn destination_for(&self, entity: &ResolvedEntity) -> PathBuf {
        PathBuf::from(
            self.destination
                .replace("{entity_type}", &entity.entity_type)
                .replace("{variant}", &entity.variant)
                .replace("{internal_name}", &entity.internal_name)
                .replace("{file_name}", &self.file_name),
        )
    }
}

/// A failed mirror copy. Never fails the run it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorWarning {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub message: String,
}

impl fmt::Display for MirrorWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error copying {} to {}: {}",
            self.source.display(),
            self.destination.display(),
            self.message
        )
    }
}

/// Publishing interface used by the pipeline orchestrators.
pub trait ArtifactPublisher: Send + Sync {
    /// Copy `files` into a new `<run_id>` directory and repoint the latest alias.
    fn publish(
        &self,
        run_id: &RunId,
        entity_type: &str,
        variant: &str,
        files: &[PathBuf],
    ) -> Result<PublishedRun>;

    /// The run the latest alias currently references.
    fn get_latest(&self, entity_type: &str, variant: &str) -> Result<PublishedRun>;

    /// Published run ids in ascending order.
    fn list_runs(&self, entity_type: &str, variant: &str) -> Result<Vec<RunId>>;

    fn load_run(&self, entity_type: &str, variant: &str, run_id: &RunId) -> Result<PublishedRun>;

    /// Best-effort copy of `source` to `destination`, replacing any existing file.
    fn mirror(&self, source: &Path, destination: &Path) -> std::result::Result<(), MirrorWarning>;
}
