//! Module `resource` holds the rendered-resource representation used between
//! the executor, the emitters, and the applier.

use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::weight::weight;

/// Origin tags a rendered resource with where it came from. The tags travel
/// out-of-band: they never serialize into the manifest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Origin {
    /// Component is the originating component name.
    pub component: String,
    /// Transformer is the FQN of the transformer that produced the resource.
    pub transformer: String,
}

/// Resource is one Kubernetes object produced by the render pipeline.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Resource {
    /// ApiVersion is the Kubernetes `group/version` (or bare version for the
    /// core group).
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Kind is the Kubernetes kind.
    pub kind: String,
    /// Metadata is the object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Body is every field other than the type and metadata headers.
    #[serde(flatten)]
    pub body: Map<String, Value>,
    /// Origin identifies the producing component and transformer.
    #[serde(skip)]
    pub origin: Origin,
}

impl Resource {
    /// Name reports the object name, or the empty string when unset.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    /// Namespace reports the object namespace, or the empty string for
    /// cluster-scoped objects.
    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("")
    }

    /// Group reports the API group; the core group is the empty string.
    pub fn group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    /// Version reports the API version within the group.
    pub fn version(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((_, version)) => version,
            None => &self.api_version,
        }
    }

    /// Weight reports the apply-order weight of this resource's kind.
    pub fn weight(&self) -> i32 {
        weight(self.group(), &self.kind)
    }

    /// Sort_key reports the 5-key total order used for both apply order and
    /// the manifest digest.
    pub fn sort_key(&self) -> SortKey<'_> {
        SortKey {
            weight: self.weight(),
            group: self.group(),
            kind: &self.kind,
            namespace: self.namespace(),
            name: self.name(),
        }
    }
}

/// SortKey is the (weight, group, kind, namespace, name) total order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct SortKey<'a> {
    /// Weight from the fixed table; the primary key.
    pub weight: i32,
    /// Group breaks ties between equal weights.
    pub group: &'a str,
    /// Kind breaks ties within a group.
    pub kind: &'a str,
    /// Namespace breaks ties within a kind.
    pub namespace: &'a str,
    /// Name is the final key.
    pub name: &'a str,
}

/// Sort_forward sorts resources into apply order.
pub fn sort_forward(resources: &mut [Resource]) {
    resources.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Sort_reverse sorts resources into delete order.
pub fn sort_reverse(resources: &mut [Resource]) {
    resources.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

/// Cmp_forward compares two resources in apply order, for use with sorted
/// collections of borrowed resources.
pub fn cmp_forward(a: &Resource, b: &Resource) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// Cluster_scoped reports whether the kind is cluster-scoped and must not be
/// defaulted into the release namespace.
pub fn cluster_scoped(kind: &str) -> bool {
    matches!(
        kind,
        "Namespace"
            | "CustomResourceDefinition"
            | "ClusterRole"
            | "ClusterRoleBinding"
            | "PersistentVolume"
            | "StorageClass"
            | "IngressClass"
            | "PriorityClass"
            | "ValidatingWebhookConfiguration"
            | "MutatingWebhookConfiguration"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(api_version: &str, kind: &str, ns: &str, name: &str) -> Resource {
        serde_json::from_value(json!({
            "apiVersion": api_version,
            "kind": kind,
            "metadata": {"name": name, "namespace": ns},
        }))
        .unwrap()
    }

    #[test]
    fn round_trips_unknown_body_fields() {
        let v = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"replicas": 3},
        });
        let r: Resource = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(r.group(), "apps");
        assert_eq!(r.version(), "v1");
        assert_eq!(serde_json::to_value(&r).unwrap(), v);
    }

    #[test]
    fn five_key_order() {
        let mut rs = vec![
            res("apps/v1", "Deployment", "default", "web"),
            res("v1", "Service", "default", "web"),
            res("v1", "ConfigMap", "default", "b"),
            res("v1", "ConfigMap", "default", "a"),
            res("v1", "Namespace", "", "default"),
        ];
        sort_forward(&mut rs);
        let names: Vec<_> = rs.iter().map(|r| (r.kind.as_str(), r.name())).collect();
        assert_eq!(
            names,
            [
                ("Namespace", "default"),
                ("ConfigMap", "a"),
                ("ConfigMap", "b"),
                ("Service", "web"),
                ("Deployment", "web"),
            ]
        );
    }

    #[test]
    fn core_group_is_empty() {
        let r = res("v1", "Service", "default", "web");
        assert_eq!(r.group(), "");
        assert_eq!(r.version(), "v1");
    }
}
