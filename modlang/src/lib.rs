#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Modlang is the configuration-language runtime for the deployment engine.
//!
//! It provides the value model the rest of the tool builds on: deep
//! unification of value overlays with per-path provenance, the typed schema
//! walk that validates user values, concreteness checks, and the expression
//! environments used to evaluate templates. Evaluation environments are
//! shared-nothing; callers hand workers a fully resolved value snapshot and
//! each worker builds its own private environment.

use std::path::PathBuf;

pub mod concrete;
pub mod env;
pub mod provenance;
pub mod schema;
pub mod value;

pub use provenance::{Position, Provenance};
pub use schema::{Schema, Violation, ViolationKind};
pub use value::ValueSet;

/// Error enumerates the failures this crate reports.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Yaml is a parse failure in a source file.
    #[error("{file}: {source}")]
    Yaml {
        /// File that failed to parse.
        file: PathBuf,
        /// Underlying parser error.
        source: serde_yaml::Error,
    },
    /// Json is a serialization failure while moving values between
    /// representations.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Template is an expression evaluation failure.
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),
    /// Schema is a malformed schema declaration.
    #[error("schema error at {path:?}: {message}")]
    Schema {
        /// Dotted path of the offending schema node.
        path: String,
        /// Failure detail.
        message: String,
    },
}

/// Result typedef for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
