#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Cli implements the `opm` command: the render-apply-reconcile pipeline
//! over modules, providers, and a Kubernetes cluster.

pub mod apply;
pub mod config;
pub mod inventory;
pub mod output;
pub mod render;
pub mod status;

/// Prelude is the common imports for command implementations.
pub(crate) mod prelude {
    pub use std::collections::BTreeMap;
    pub use std::path::{Path, PathBuf};

    pub use tokio_util::sync::CancellationToken;
    pub use tracing::{debug, info, instrument, trace, warn};

    pub use opm_api::{Resource, resolved::Source};

    pub use crate::config::GlobalConfig;
    pub use crate::{Error, Result};
}

/// EXIT_VALIDATION is the exit code for validation and unmatched-component
/// failures; runtime failures exit 1.
pub const EXIT_VALIDATION: i32 = 2;

/// Error enumerates the failures of the command layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Config indicates the runtime configuration is unusable: a bad path,
    /// an unparsable or schema-invalid file, or providers declared with no
    /// registry resolvable from any source.
    #[error("config error: {0}")]
    Config(String),
    /// Render passes through render pipeline failures.
    #[error(transparent)]
    Render(#[from] opm_render::Error),
    /// Cue indicates the evaluator failed outside the render pipeline.
    #[error("evaluator error: {0}")]
    Cue(#[from] opm_cue::Error),
    /// Kube is a generic error from the `kube` crate.
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    /// KubeConfig indicates the process was unable to build a client
    /// configuration.
    #[error("kubeconfig error: {0}")]
    KubeConfig(#[from] kube::config::KubeconfigError),
    /// InferConfig indicates no client configuration could be inferred.
    #[error("kubeconfig error: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),
    /// Io indicates some OS-level I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON indicates a JSON serialization failed.
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),
    /// YAML indicates a YAML serialization failed.
    #[error("yaml error: {0}")]
    YAML(#[from] serde_yaml::Error),
    /// Inventory indicates the inventory record could not be encoded or
    /// decoded.
    #[error("inventory error: {0}")]
    Inventory(#[from] opm_api::Error),
    /// ApplyConflict indicates a server-side apply conflict or an
    /// optimistic-concurrency failure on the inventory write.
    #[error("apply conflict: {0}; retry the apply")]
    ApplyConflict(String),
    /// Untracked indicates a first-time apply found a live object OPM does
    /// not own.
    #[error(
        "{kind} {namespace}/{name} exists but is not managed by OPM; use --force to adopt it"
    )]
    Untracked {
        /// Kind of the live object.
        kind: String,
        /// Namespace of the live object.
        namespace: String,
        /// Name of the live object.
        name: String,
    },
    /// Terminating indicates a first-time apply found a live object that is
    /// being deleted.
    #[error("{kind} {namespace}/{name} is terminating; wait for deletion to finish")]
    Terminating {
        /// Kind of the live object.
        kind: String,
        /// Namespace of the live object.
        namespace: String,
        /// Name of the live object.
        name: String,
    },
    /// RenderErrors summarizes an aggregated fail-on-end render pass; the
    /// individual failures were already reported.
    #[error("render failed with {0} error(s)")]
    RenderErrors(usize),
    /// ReleaseNotFound indicates no inventory exists for a release.
    #[error("no release {0} found")]
    ReleaseNotFound(String),
    /// Canceled indicates the operation was interrupted.
    #[error("operation canceled")]
    Canceled,
    /// Other is a catch-all error.
    #[error("some other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Exit_code maps the error to the process exit code: validation-class
    /// failures exit 2, runtime failures exit 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Render(
                opm_render::Error::ReleaseValidation { .. }
                | opm_render::Error::UnmatchedComponent { .. }
                | opm_render::Error::TransformFailure { .. },
            ) => EXIT_VALIDATION,
            Error::RenderErrors(_) => EXIT_VALIDATION,
            Error::Config(_) => EXIT_VALIDATION,
            _ => 1,
        }
    }
}

/// Result typedef using this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
