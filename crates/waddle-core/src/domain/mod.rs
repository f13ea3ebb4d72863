//! Domain models for waddle.
//!
//! - `EntityTaxonomy`: catalog of entity types, variants and internal names
//! - `RunRequest`: one invocation of a pipeline capability
//! - `RunId` / `RunLog`: run identity and execution trace

pub mod error;
pub mod request;
pub mod run;
pub mod taxonomy;

pub use error::{Result, WaddleError};
pub use request::{ParamValue, RunMode, RunRequest};
pub use run::{RunId, RunIdGenerator, RunLog};
pub use taxonomy::{EntityDefinition, EntityTaxonomy, VariantDefinition, VariantListing};
