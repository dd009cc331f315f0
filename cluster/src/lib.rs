#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Cluster implements the reconciliation half of the tool: the inventory
//! model persisted as a typed Secret, the ordered apply/prune loop, the
//! inventory-driven delete, the rendered-vs-live diff engine, and the
//! status reader.
//!
//! All cluster I/O is sequential within a release; only the render pipeline
//! is concurrent. The inventory Secret is written last on apply and deleted
//! last on delete.

pub mod apply;
pub mod client;
pub mod delete;
pub mod diff;
pub mod dynamic;
pub mod inventory;
pub mod status;

pub use apply::{ApplyOptions, ApplyReport};
pub use delete::{DeleteOptions, DeleteReport};
pub use diff::{DiffClass, DiffReport};
pub use inventory::InventoryApi;
pub use status::{Health, StatusReport};

/// Error enumerates the failures of the cluster subsystems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Kube is a generic error from the `kube` crate.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// KubeConfig indicates the process was unable to find a kubeconfig.
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),
    /// Kubeconfig indicates the named kubeconfig failed to load.
    #[error("kubeconfig error: {0}")]
    KubeconfigFile(#[from] kube::config::KubeconfigError),
    /// JSON indicates a JSON serialization failed.
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),
    /// YAML indicates a YAML serialization failed.
    #[error("yaml error: {0}")]
    YAML(#[from] serde_yaml::Error),
    /// Render is a fatal error from the render pipeline.
    #[error(transparent)]
    Render(#[from] render::Error),
    /// RenderFailed carries collected render errors; fatal for apply.
    #[error("render failed:\n{}", .0.iter().map(|e| format!("  {e}")).collect::<Vec<_>>().join("\n"))]
    RenderFailed(Vec<String>),
    /// UnknownKind means discovery cannot resolve a resource's kind.
    #[error("cluster does not serve {api_version}/{kind}")]
    UnknownKind {
        /// Api_version of the unresolvable resource.
        api_version: String,
        /// Kind of the unresolvable resource.
        kind: String,
    },
    /// Conflict is an optimistic-concurrency mismatch on an inventory
    /// write. Retry is the caller's responsibility.
    #[error("inventory for release {release:?} was modified concurrently")]
    Conflict {
        /// Release whose inventory write conflicted.
        release: String,
    },
    /// ReleaseNotFound means no inventory exists for the release.
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound {
        /// Release name searched for.
        name: String,
        /// Namespace searched in.
        namespace: String,
    },
    /// MissingName means a rendered resource has no metadata.name.
    #[error("rendered resource has no name: {0}")]
    MissingName(String),
    /// Cancelled means the ambient cancellation token fired between
    /// resources.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result typedef for the cluster subsystems.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// ErrorClass buckets errors for exit-code dispatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// General failure.
    General,
    /// Validation failure (render, schema, values).
    Validation,
    /// Connectivity failure (cluster unreachable, server errors).
    Connectivity,
    /// Permission failure (forbidden, unauthorized).
    Permission,
    /// NotFound failure (release or inventory missing).
    NotFound,
}

impl Error {
    /// Classify buckets the error for exit-code dispatch.
    pub fn classify(&self) -> ErrorClass {
        match self {
            Error::Render(_) | Error::RenderFailed(_) | Error::UnknownKind { .. } => {
                ErrorClass::Validation
            }
            Error::ReleaseNotFound { .. } => ErrorClass::NotFound,
            Error::Conflict { .. } => ErrorClass::General,
            Error::KubeConfig(_) | Error::KubeconfigFile(_) => ErrorClass::Connectivity,
            Error::Kube(err) => classify_kube(err),
            _ => ErrorClass::General,
        }
    }
}

// Classify_kube maps an API error to a class by status code; non-API
// failures are transport-level and count as connectivity.
fn classify_kube(err: &kube::Error) -> ErrorClass {
    match err {
        kube::Error::Api(resp) => match resp.code {
            401 | 403 => ErrorClass::Permission,
            404 => ErrorClass::NotFound,
            500..=599 => ErrorClass::Connectivity,
            _ => ErrorClass::General,
        },
        _ => ErrorClass::Connectivity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_not_found_message_shape() {
        let err = Error::ReleaseNotFound {
            name: "nonexistent".into(),
            namespace: "default".into(),
        };
        assert_eq!(
            err.to_string(),
            "release 'nonexistent' not found in namespace 'default'"
        );
        assert_eq!(err.classify(), ErrorClass::NotFound);
    }

    #[test]
    fn kube_api_errors_classify_by_code() {
        let mk = |code| {
            Error::Kube(kube::Error::Api(Box::new(kube::core::ErrorResponse {
                status: Some(kube::core::response::StatusSummary::Failure),
                message: "".into(),
                reason: "".into(),
                code,
                metadata: None,
                details: None,
            })))
        };
        assert_eq!(mk(403).classify(), ErrorClass::Permission);
        assert_eq!(mk(401).classify(), ErrorClass::Permission);
        assert_eq!(mk(404).classify(), ErrorClass::NotFound);
        assert_eq!(mk(503).classify(), ErrorClass::Connectivity);
        assert_eq!(mk(409).classify(), ErrorClass::General);
    }
}
