//! Module `status` summarizes the health of a release's tracked resources.

use kube::Client;
use kube::api::{Api, DynamicObject};

use opm_api::{Inventory, InventoryEntry};

use crate::apply::{api_resource, scope};
use crate::prelude::*;

/// ResourceHealth is the health summary for one tracked resource.
#[derive(Clone, Debug)]
pub struct ResourceHealth {
    /// Scope is `Kind/namespace/name`.
    pub scope: String,
    /// Component is the owning component.
    pub component: String,
    /// Health is the summary word, e.g. `ready (3/3)` or `missing`.
    pub health: String,
}

/// Release_status reads the live state of every tracked resource.
#[instrument(skip_all, fields(release = inv.release.name))]
pub async fn release_status(client: &Client, inv: &Inventory) -> Result<Vec<ResourceHealth>> {
    let mut out = Vec::new();
    for entry in inv.entries() {
        let health = probe(client, entry).await?;
        out.push(ResourceHealth {
            scope: scope(&entry.kind, &entry.namespace, &entry.name),
            component: entry.component.clone(),
            health,
        });
    }
    Ok(out)
}

async fn probe(client: &Client, entry: &InventoryEntry) -> Result<String> {
    let ar = api_resource(&entry.group, &entry.version, &entry.kind);
    let api: Api<DynamicObject> = if entry.namespace.is_empty() {
        Api::all_with(client.clone(), &ar)
    } else {
        Api::namespaced_with(client.clone(), &entry.namespace, &ar)
    };
    let Some(live) = api.get_opt(&entry.name).await? else {
        return Ok("missing".to_string());
    };
    Ok(classify(&entry.kind, &live))
}

// Workload kinds report replica readiness; everything else reports
// presence.
fn classify(kind: &str, live: &DynamicObject) -> String {
    match kind {
        "Deployment" | "StatefulSet" | "ReplicaSet" => {
            let want = live.data["spec"]["replicas"].as_i64().unwrap_or(1);
            let ready = live.data["status"]["readyReplicas"].as_i64().unwrap_or(0);
            if ready >= want {
                format!("ready ({ready}/{want})")
            } else {
                format!("progressing ({ready}/{want})")
            }
        }
        "DaemonSet" => {
            let want = live.data["status"]["desiredNumberScheduled"]
                .as_i64()
                .unwrap_or(0);
            let ready = live.data["status"]["numberReady"].as_i64().unwrap_or(0);
            if ready >= want {
                format!("ready ({ready}/{want})")
            } else {
                format!("progressing ({ready}/{want})")
            }
        }
        "Job" => {
            if live.data["status"]["succeeded"].as_i64().unwrap_or(0) > 0 {
                "complete".to_string()
            } else {
                "running".to_string()
            }
        }
        _ => "present".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dynamic(doc: serde_json::Value) -> DynamicObject {
        serde_json::from_value(doc).unwrap()
    }

    #[test]
    fn deployment_readiness() {
        let live = dynamic(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3},
        }));
        assert_eq!(classify("Deployment", &live), "ready (3/3)");

        let live = dynamic(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 1},
        }));
        assert_eq!(classify("Deployment", &live), "progressing (1/3)");
    }

    #[test]
    fn plain_resources_report_presence() {
        let live = dynamic(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "cfg"},
        }));
        assert_eq!(classify("ConfigMap", &live), "present");
    }
}
