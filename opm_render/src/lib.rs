#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Opm_render turns modules into Kubernetes resources.
//!
//! The pipeline: [`release::build`] compiles a module plus effective values
//! into a concrete [`release::BuiltRelease`]; [`provider::load_provider`]
//! extracts the configured provider's transformers;
//! [`matcher::match_components`] pairs components with transformers by
//! structural matching; [`executor::execute`] runs each pair and normalizes
//! the output into [`opm_api::Resource`] values.

use std::path::PathBuf;

pub mod executor;
pub mod matcher;
pub mod provider;
pub mod release;

pub use executor::{ExecOutput, execute};
pub use matcher::{Match, MatchSet, match_components};
pub use provider::{LoadedProvider, LoadedTransformer, load_provider};
pub use release::{BuiltRelease, LoadedComponent, ReleaseOptions, build};

/// Error enumerates the render pipeline failures.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// InvalidModule indicates the module directory failed validation
    /// before any evaluation.
    #[error("invalid module at {path}: {reason}")]
    InvalidModule {
        /// Path is the module directory.
        path: PathBuf,
        /// Reason says what was missing.
        reason: String,
    },
    /// ModuleLoad indicates the evaluator failed to load or evaluate the
    /// module.
    #[error("module load error: {0}")]
    ModuleLoad(#[source] opm_cue::Error),
    /// ReleaseValidation indicates abstract values remained after value
    /// injection.
    #[error("release is not concrete; abstract paths: {}", paths.join(", "))]
    ReleaseValidation {
        /// Paths lists the abstract paths, prefixed with their component.
        paths: Vec<String>,
    },
    /// Provider indicates the provider value is malformed.
    #[error("provider {provider}: {reason}")]
    Provider {
        /// Provider is the provider name.
        provider: String,
        /// Reason says what was wrong.
        reason: String,
    },
    /// UnmatchedComponent indicates a component matched zero transformers.
    #[error("component {component} matched no transformers")]
    UnmatchedComponent {
        /// Component is the component name.
        component: String,
    },
    /// TransformFailure indicates one transformer execution failed.
    #[error("transformer {transformer} failed on component {component}: {reason}")]
    TransformFailure {
        /// Transformer is the transformer FQN.
        transformer: String,
        /// Component is the component name.
        component: String,
        /// Reason is the evaluation or decode error.
        reason: String,
    },
    /// Cue passes through evaluator errors outside the taxonomy above.
    #[error(transparent)]
    Cue(#[from] opm_cue::Error),
}

/// Result typedef using this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
