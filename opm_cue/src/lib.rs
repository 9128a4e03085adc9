#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Opm_cue is the evaluator host for the constraint language used by OPM
//! modules, providers, and configuration.
//!
//! The rest of the workspace talks to the language exclusively through
//! [`Context`] and [`Value`]: loading packages from directories, compiling
//! sources, filling values at paths, looking paths up, unifying, iterating
//! fields, validating concreteness, and decoding into Rust values.
//!
//! The implemented language subset covers structs, lists, scalars,
//! definitions (`#name`), hidden fields (`_name`), optional fields, type
//! atoms, defaults and disjunctions, unification, comparison constraints,
//! selector chains, string interpolation, and the builtin `uuid` and
//! `strings` packages. Imports outside the builtin set require a registry
//! resolver and are reported as load errors.
//!
//! Values are handles into immutable trees: every write operation returns a
//! new value. The evaluator is deliberately not safe for concurrent use;
//! handles are `!Send` by construction.

pub mod ast;
mod eval;
mod loader;
mod parser;
mod path;
mod token;
mod value;

pub use loader::{LoadOptions, load};
pub use parser::{parse_expr, parse_file};
pub use path::{Path, Selector};
pub use value::{Context, FieldIter, Value};

/// REGISTRY_ENV is the environment variable pointing the evaluator at its
/// module registry. It is set for the duration of a load and unset on
/// return.
pub static REGISTRY_ENV: &str = "CUE_REGISTRY";

/// Error enumerates the failures reported by the evaluator host.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Parse indicates the source text was not valid syntax.
    #[error("{file}:{line}:{col}: {msg}")]
    Parse {
        /// File is the source file name, or `<input>` for compiled bytes.
        file: String,
        /// Line is the 1-based source line.
        line: usize,
        /// Col is the 1-based source column.
        col: usize,
        /// Msg describes the syntax problem.
        msg: String,
    },
    /// Eval indicates evaluation reached an error value.
    #[error("evaluation error: {0}")]
    Eval(String),
    /// NotFound indicates a looked-up path does not exist.
    #[error("path not found: {0}")]
    NotFound(String),
    /// NotConcrete reports the abstract paths of a value that was required
    /// to be fully concrete.
    #[error("value is not concrete: {}", .0.join(", "))]
    NotConcrete(Vec<String>),
    /// Decode indicates a concrete value did not fit the requested Rust
    /// type.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    /// Import indicates an import could not be resolved.
    #[error("cannot resolve import {0:?}: not a builtin package and no registry resolver is available")]
    Import(String),
    /// Io indicates a filesystem error while loading a package.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Load indicates a package-level problem while loading a directory.
    #[error("load error: {0}")]
    Load(String),
}

/// Result typedef using this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
