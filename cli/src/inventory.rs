//! Module `inventory` reads and writes the per-release inventory Secret
//! and computes what an apply must prune.

use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams};

use opm_api::inventory::{filter_renames, stale_entries};
use opm_api::labels::{INVENTORY_COMPONENT, opm_label, release_label};
use opm_api::metadata::ReleaseMetadata;
use opm_api::weight::weight;
use opm_api::{FIELD_MANAGER, Inventory, InventoryEntry};

use crate::prelude::*;

/// Discover reads a release's inventory: first the well-known Secret name,
/// then a label-filtered list as fallback. `None` means a first-time apply.
#[instrument(skip(client), fields(release = release.name, namespace = release.namespace))]
pub async fn discover(client: &Client, release: &ReleaseMetadata) -> Result<Option<Inventory>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &release.namespace);
    if let Some(secret) = api.get_opt(&Inventory::secret_name(release)).await? {
        return Ok(Some(Inventory::unmarshal(&secret)?));
    }
    let selector = format!(
        "{}={},{}={}",
        release_label("uuid"),
        release.uuid,
        opm_label("component"),
        INVENTORY_COMPONENT,
    );
    discover_by_selector(&api, &selector).await
}

/// Discover_by_name finds a release's inventory knowing only the release
/// name and namespace, as `mod delete` and `mod status` do.
#[instrument(skip(client))]
pub async fn discover_by_name(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<Inventory>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let selector = format!(
        "{}={},{}={}",
        release_label("name"),
        name,
        opm_label("component"),
        INVENTORY_COMPONENT,
    );
    discover_by_selector(&api, &selector).await
}

async fn discover_by_selector(api: &Api<Secret>, selector: &str) -> Result<Option<Inventory>> {
    trace!(selector, "listing inventory secrets");
    let list = api.list(&ListParams::default().labels(selector)).await?;
    match list.items.first() {
        Some(secret) => Ok(Some(Inventory::unmarshal(secret)?)),
        None => Ok(None),
    }
}

/// Write persists the inventory. The first write creates the Secret; later
/// writes replace it under the prior resource-version token, so a
/// conflicting concurrent apply surfaces as a retryable error.
#[instrument(skip_all, fields(release = inv.release.name))]
pub async fn write(client: &Client, inv: &Inventory) -> Result<Inventory> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &inv.release.namespace);
    let secret = inv.marshal()?;
    let pp = PostParams {
        dry_run: false,
        field_manager: Some(FIELD_MANAGER.to_string()),
    };
    let name = Inventory::secret_name(&inv.release);
    let stored = if inv.resource_version.is_some() {
        api.replace(&name, &pp, &secret).await
    } else {
        api.create(&pp, &secret).await
    }
    .map_err(|err| match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::ApplyConflict(format!(
            "inventory for {} was modified concurrently",
            inv.release.name
        )),
        err => err.into(),
    })?;
    debug!(name, "inventory written");
    Ok(Inventory::unmarshal(&stored)?)
}

/// Remove deletes the inventory Secret itself, after a release's resources
/// are gone. A 404 is success.
#[instrument(skip_all, fields(release = inv.release.name))]
pub async fn remove(client: &Client, inv: &Inventory) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), &inv.release.namespace);
    match api
        .delete(&Inventory::secret_name(&inv.release), &DeleteParams::default())
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Prunable computes which previously tracked resources an apply must
/// delete: the stale set by identity, minus component renames, minus
/// Namespaces, in reverse total order (workloads first).
pub fn prunable(previous: &[InventoryEntry], current: &[InventoryEntry]) -> Vec<InventoryEntry> {
    let stale = stale_entries(previous, current);
    let mut out: Vec<InventoryEntry> = filter_renames(stale, current)
        .into_iter()
        .filter(|e| e.kind != "Namespace")
        .collect();
    out.sort_by(|a, b| entry_key(b).cmp(&entry_key(a)));
    out
}

fn entry_key<'e>(e: &'e InventoryEntry) -> (i32, &'e str, &'e str, &'e str, &'e str) {
    (
        weight(&e.group, &e.kind),
        &e.group,
        &e.kind,
        &e.namespace,
        &e.name,
    )
}

/// Delete_order sorts a release's tracked resources for `mod delete`:
/// everything, Namespaces included, in reverse total order.
pub fn delete_order(entries: &[InventoryEntry]) -> Vec<InventoryEntry> {
    let mut out = entries.to_vec();
    out.sort_by(|a, b| entry_key(b).cmp(&entry_key(a)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(group: &str, kind: &str, name: &str, component: &str) -> InventoryEntry {
        InventoryEntry {
            group: group.into(),
            kind: kind.into(),
            namespace: "default".into(),
            name: name.into(),
            version: "v1".into(),
            component: component.into(),
        }
    }

    #[test]
    fn prunes_in_reverse_order() {
        let previous = vec![
            entry("", "ConfigMap", "web-config", "web"),
            entry("apps", "Deployment", "db", "db"),
            entry("", "Service", "db", "db"),
            entry("", "ConfigMap", "db-config", "db"),
        ];
        let current = vec![entry("", "ConfigMap", "web-config", "web")];
        let got = prunable(&previous, &current);
        let kinds: Vec<&str> = got.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment", "Service", "ConfigMap"]);
    }

    #[test]
    fn namespaces_are_never_pruned() {
        let previous = vec![
            entry("", "Namespace", "staging", "ns"),
            entry("apps", "Deployment", "db", "db"),
        ];
        let got = prunable(&previous, &[]);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, "Deployment");
    }

    #[test]
    fn renames_survive_pruning() {
        let previous = vec![entry("apps", "Deployment", "app", "web")];
        let current = vec![entry("apps", "Deployment", "app", "frontend")];
        assert!(prunable(&previous, &current).is_empty());
    }

    #[test]
    fn delete_order_is_reverse_total_order() {
        let entries = vec![
            entry("", "Namespace", "prod", "ns"),
            entry("apps", "Deployment", "web", "web"),
            entry("", "ConfigMap", "cfg", "web"),
        ];
        let got = delete_order(&entries);
        let kinds: Vec<&str> = got.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment", "ConfigMap", "Namespace"]);
    }
}
