//! Module `labels` holds the standard label set stamped on every rendered
//! resource and on the inventory Secret.

use std::collections::BTreeMap;

use crate::metadata::{ModuleMetadata, ReleaseMetadata};

/// MANAGED_BY_KEY is the well-known Kubernetes "managed-by" label.
pub static MANAGED_BY_KEY: &str = "app.kubernetes.io/managed-by";

/// MANAGED_BY_VALUE identifies resources owned by OPM.
pub static MANAGED_BY_VALUE: &str = "open-platform-model";

/// INVENTORY_COMPONENT is the label value marking the inventory Secret, so
/// workload discovery can exclude it.
pub static INVENTORY_COMPONENT: &str = "inventory";

/// Keyify sanitizes the key for use in k8s metadata.
fn keyify<S: ToString, K: AsRef<str>>(space: S, key: K) -> String {
    let mut out = space.to_string();
    key.as_ref()
        .chars()
        .map(|c| match c {
            '_' | ' ' | '\t' | '\n' => '-',
            _ => c.to_ascii_lowercase(),
        })
        .for_each(|c| out.push(c));
    out
}

/// Opm_label returns the provided argument as a name in the bare OPM space,
/// suitable for use as an annotation or label.
pub fn opm_label<S: AsRef<str>>(s: S) -> String {
    keyify("opmodel.dev/", s)
}

/// Module_label returns the provided argument as a name in the module space.
pub fn module_label<S: AsRef<str>>(s: S) -> String {
    keyify("module.opmodel.dev/", s)
}

/// Release_label returns the provided argument as a name in the
/// module-release space.
pub fn release_label<S: AsRef<str>>(s: S) -> String {
    keyify("module-release.opmodel.dev/", s)
}

/// Component_label returns the provided argument as a name in the component
/// space.
pub fn component_label<S: AsRef<str>>(s: S) -> String {
    keyify("component.opmodel.dev/", s)
}

/// Standard_labels is the full label set stamped on every transformed
/// resource during rendering.
///
/// These labels are the sole basis for inventory discovery and apply-time
/// ownership checks, so the scheme must not change between minor versions.
pub fn standard_labels(
    module: &ModuleMetadata,
    release: &ReleaseMetadata,
    component: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_KEY.into(), MANAGED_BY_VALUE.into()),
        (module_label("name"), module.name.clone()),
        (module_label("version"), module.version.clone()),
        (module_label("uuid"), module.uuid.clone()),
        (component_label("name"), component.into()),
        (release_label("name"), release.name.clone()),
        (release_label("version"), module.version.clone()),
        (release_label("uuid"), release.uuid.clone()),
    ])
}

/// Inventory_labels is the label set on the inventory Secret itself: the
/// release-scoped standard labels plus the inventory marker.
pub fn inventory_labels(
    module: &ModuleMetadata,
    release: &ReleaseMetadata,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_KEY.into(), MANAGED_BY_VALUE.into()),
        (module_label("name"), module.name.clone()),
        (module_label("version"), module.version.clone()),
        (module_label("uuid"), module.uuid.clone()),
        (release_label("name"), release.name.clone()),
        (release_label("version"), module.version.clone()),
        (release_label("uuid"), release.uuid.clone()),
        (opm_label("component"), INVENTORY_COMPONENT.into()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys() {
        assert_eq!(module_label("UUID"), "module.opmodel.dev/uuid");
        assert_eq!(release_label("name"), "module-release.opmodel.dev/name");
        assert_eq!(component_label("name"), "component.opmodel.dev/name");
        assert_eq!(opm_label("component"), "opmodel.dev/component");
    }

    #[test]
    fn inventory_excluded_from_workloads() {
        let labels = inventory_labels(&ModuleMetadata::default(), &ReleaseMetadata::default());
        assert_eq!(
            labels.get("opmodel.dev/component").map(String::as_str),
            Some("inventory")
        );
        assert!(!labels.contains_key("component.opmodel.dev/name"));
    }
}
