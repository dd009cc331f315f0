#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Render implements the five-phase pipeline that turns a module directory
//! into an ordered set of platform resources: load, release build, match,
//! transform, aggregate.
//!
//! The pipeline is the only concurrent section of the tool. Transformer
//! evaluation fans out to a bounded worker pool; each worker owns a private
//! expression environment and receives inputs as a fully resolved value
//! snapshot. Errors inside the pipeline collect into the
//! [api::RenderResult] (fail on end); errors returned from
//! [pipeline::Pipeline::render] itself are fatal.

use std::fmt;
use std::path::PathBuf;

use modlang::Position;

pub mod executor;
pub mod loader;
pub mod pipeline;
pub mod provider;
pub mod release;

pub use loader::Module;
pub use pipeline::{Pipeline, RenderOptions, RenderRequest};
pub use provider::{Provider, Transformer};
pub use release::ModuleRelease;

/// ValidationIssue is one structured finding of the values validation walk.
#[derive(Clone, Debug)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, rooted at `values`.
    pub path: String,
    /// Human-readable description.
    pub message: String,
    /// Position of the file that introduced the field, when known.
    pub position: Option<Position>,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(pos) => write!(f, "{pos}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Error enumerates the fatal failures of the render pipeline.
///
/// Collected render errors (unmatched components, transform failures) are
/// not here; they land in [api::RenderResult::errors].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Path means the module path does not exist or is not a directory.
    #[error("module path not found: {0}")]
    Path(PathBuf),
    /// NotAModule means the directory holds no module definition.
    #[error("not a module directory (no module.yaml): {0}")]
    NotAModule(PathBuf),
    /// Compile is a config-language compilation failure.
    #[error("compile error: {0}")]
    Compile(#[from] modlang::Error),
    /// MissingMetadata means a required metadata field is absent.
    #[error("module metadata is missing required field {field:?}")]
    MissingMetadata {
        /// The absent field.
        field: &'static str,
    },
    /// Validation means the unified values do not satisfy the module
    /// config schema.
    #[error("values validation failed:\n{}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),
    /// NotConcrete means a component's value has unresolved paths.
    #[error("component {component:?} is not concrete at: {}", paths.join(", "))]
    NotConcrete {
        /// Component that failed the gate.
        component: String,
        /// Non-concrete dotted paths.
        paths: Vec<String>,
    },
    /// Provider means a provider directory failed to load.
    #[error("provider error in {path}: {message}")]
    Provider {
        /// Provider directory.
        path: PathBuf,
        /// Failure detail.
        message: String,
    },
    /// Cancelled means the ambient cancellation token fired mid-render.
    ///
    /// Distinct from render errors: it never lands in a RenderResult.
    #[error("render cancelled")]
    Cancelled,
    /// Encode is a YAML serialization failure on output.
    #[error("yaml error: {0}")]
    Encode(#[from] serde_yaml::Error),
    /// Json is a JSON serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Io is an OS-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Join is a worker that panicked or was aborted.
    #[error("worker error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result typedef for the render pipeline.
pub type Result<T, E = Error> = std::result::Result<T, E>;
