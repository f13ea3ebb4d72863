//! Domain-level error taxonomy for waddle.

use std::path::PathBuf;

/// Waddle domain errors.
#[derive(Debug, thiserror::Error)]
pub enum WaddleError {
    #[error("unknown entity type '{entity_type}'; valid types: {}", join_or_none(.valid))]
    UnknownEntityType {
        entity_type: String,
        valid: Vec<String>,
    },

    #[error(
        "unknown variant '{variant}' for entity type '{entity_type}'; valid variants: {}",
        join_or_none(.valid)
    )]
    UnknownVariant {
        entity_type: String,
        variant: String,
        valid: Vec<String>,
    },

    #[error("entity type '{0}' declares no variants")]
    NoVariants(String),

    #[error("unknown internal name: {0}")]
    UnknownInternalName(String),

    #[error(
        "internal name '{internal_name}' is declared by both {first} and {second}"
    )]
    DuplicateInternalName {
        internal_name: String,
        first: String,
        second: String,
    },

    #[error("taxonomy directory does not exist: {0}")]
    MissingTaxonomyDir(PathBuf),

    #[error("invalid entity definition: {0}")]
    InvalidDefinition(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WaddleError {
    /// Whether this error means the caller asked for something the taxonomy
    /// does not contain.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            WaddleError::UnknownEntityType { .. }
                | WaddleError::UnknownVariant { .. }
                | WaddleError::NoVariants(_)
                | WaddleError::UnknownInternalName(_)
        )
    }
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "(none)".to_string()
    } else {
        values.join(", ")
    }
}

/// Result type for waddle domain operations.
pub type Result<T> = std::result::Result<T, WaddleError>;
