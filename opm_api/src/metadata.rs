//! Module `metadata` holds the identity types for modules and releases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// NAMESPACE_OPM is the UUID namespace for all deterministic OPM identities.
///
/// It is itself the UUIDv5 of "opmodel.dev" in the DNS namespace, so every
/// client derives the same release identities with no shared state.
pub static NAMESPACE_OPM: Uuid = uuid::uuid!("c1cbe76d-5687-5a47-bfe6-83b081b15413");

/// Release_uuid reports the deterministic identity of a release.
///
/// The identity is a pure function of the module FQN, the release name, and
/// the target namespace; identical inputs yield identical UUIDs across
/// machines and runs.
pub fn release_uuid(fqn: &str, release: &str, namespace: &str) -> Uuid {
    Uuid::new_v5(&NAMESPACE_OPM, format!("{fqn}:{release}:{namespace}").as_bytes())
}

/// ModuleMetadata is the identity of the module a release was built from.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    /// Name is the short module name.
    pub name: String,
    /// Fqn is the fully qualified module name, e.g. `opm.example/hello@v0`.
    pub fqn: String,
    /// Version is the module version.
    pub version: String,
    /// Uuid is the module-identity UUID declared in the module itself.
    pub uuid: String,
    /// Labels are the author-declared module labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Components lists the component names the module declares.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

/// ReleaseMetadata is the identity of one concrete release of a module.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseMetadata {
    /// Name is the release name.
    pub name: String,
    /// Namespace is the target namespace.
    pub namespace: String,
    /// Uuid is the release-identity UUID; see [`release_uuid`].
    pub uuid: String,
    /// Labels are the module labels merged with the release standard labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Components lists the component names rendered for this release.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_uuid_is_pure() {
        let a = release_uuid("opm.example/hello@v0", "hello", "default");
        let b = release_uuid("opm.example/hello@v0", "hello", "default");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "70291328-d618-5a2f-ac7e-2d6ddda02f43");
    }

    #[test]
    fn release_uuid_binds_namespace() {
        let a = release_uuid("opm.example/hello@v0", "hello", "default");
        let b = release_uuid("opm.example/hello@v0", "hello", "prod");
        assert_ne!(a, b);
    }
}
