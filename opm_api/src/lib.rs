#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Opm_api contains the data model shared by the OPM workspace: release and
//! module metadata, rendered resources, the apply-order weight table, the
//! manifest digest, and the persisted inventory records.

pub mod digest;
pub mod inventory;
pub mod labels;
pub mod metadata;
pub mod resolved;
pub mod resource;
pub mod weight;

pub use digest::manifest_digest;
pub use inventory::{ChangeEntry, Inventory, InventoryEntry};
pub use metadata::{ModuleMetadata, ReleaseMetadata, release_uuid};
pub use resolved::{ResolvedField, Source};
pub use resource::Resource;

/// GROUP is the label and annotation namespace for all OPM metadata.
pub static GROUP: &str = "opmodel.dev";

/// FIELD_MANAGER is the name reported to the Kubernetes API for server-side
/// apply operations.
pub static FIELD_MANAGER: &str = "opm";

/// Error enumerates the failures of this crate's codecs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// JSON indicates a serialization failed.
    #[error("json error: {0}")]
    JSON(#[from] serde_json::Error),
    /// MissingKey indicates an inventory Secret is missing a required body key.
    #[error("inventory secret missing key: {0}")]
    MissingKey(String),
    /// Header indicates an inventory Secret carries an unrecognized header.
    #[error("unrecognized inventory header: {0}")]
    Header(String),
    /// DanglingChange indicates the index names a change with no stored entry.
    #[error("change listed in index but not stored: {0}")]
    DanglingChange(String),
}

/// Result typedef using this crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
