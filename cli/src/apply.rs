//! Module `apply` talks to the Kubernetes API: building the client,
//! deriving GVRs, server-side apply in forward order, and deletion in
//! reverse order.

use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy};
use kube::config::{Config, KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, GroupVersionKind};
use kube::Client;

use opm_api::labels::{MANAGED_BY_KEY, MANAGED_BY_VALUE};
use opm_api::resource::cluster_scoped;
use opm_api::{FIELD_MANAGER, InventoryEntry};

use crate::prelude::*;

/// ApplyAction classifies what server-side apply did to one resource.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ApplyAction {
    /// The resource did not exist before the patch.
    Created,
    /// The resource existed and the patch changed it.
    Configured,
    /// The resource existed and the patch was a no-op.
    Unchanged,
    /// The resource was deleted (pruning and `mod delete`).
    Deleted,
}

/// Applied is the outcome for one resource.
#[derive(Clone, Debug)]
pub struct Applied {
    /// Scope is `Kind/namespace/name` (or `Kind/name` for cluster-scoped
    /// resources).
    pub scope: String,
    /// Action is what happened.
    pub action: ApplyAction,
}

/// ApplyOpts tunes an apply pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyOpts {
    /// Dry_run activates the server's dry-run mode; nothing persists.
    pub dry_run: bool,
    /// Force adopts live objects that are not yet managed by OPM.
    pub force: bool,
}

/// Client builds a Kubernetes client from the resolved configuration.
pub async fn client(cfg: &GlobalConfig) -> Result<Client> {
    let kubeconfig = cfg.kubeconfig.as_ref().map(|f| f.value.clone());
    let context = cfg.context.as_ref().map(|f| f.value.clone());
    let config = match (kubeconfig, context) {
        (None, None) => Config::infer().await?,
        (path, context) => {
            let kc = match path {
                Some(path) => Kubeconfig::read_from(path)?,
                None => Kubeconfig::read()?,
            };
            let opts = KubeConfigOptions {
                context,
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kc, &opts).await?
        }
    };
    Ok(Client::try_from(config)?)
}

/// Plural derives the resource name for a kind: a curated table of
/// irregulars, then lowercase with standard English pluralization.
pub fn plural(kind: &str) -> String {
    match kind {
        // Kinds that are already plural.
        "Endpoints" => return "endpoints".to_string(),
        _ => {}
    }
    let lower = kind.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        return format!("{stem}ies");
    }
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") {
        return format!("{lower}es");
    }
    format!("{lower}s")
}

/// Api_resource builds the dynamic API descriptor for a group, version,
/// and kind.
pub fn api_resource(group: &str, version: &str, kind: &str) -> ApiResource {
    let gvk = GroupVersionKind::gvk(group, version, kind);
    ApiResource::from_gvk_with_plural(&gvk, &plural(kind))
}

fn dynamic_api(client: &Client, ar: &ApiResource, kind: &str, namespace: &str) -> Api<DynamicObject> {
    if cluster_scoped(kind) || namespace.is_empty() {
        Api::all_with(client.clone(), ar)
    } else {
        Api::namespaced_with(client.clone(), namespace, ar)
    }
}

/// Scope renders the two-tier resource scope used in status lines.
pub fn scope(kind: &str, namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("{kind}/{name}")
    } else {
        format!("{kind}/{namespace}/{name}")
    }
}

/// Preflight is the first-time existence check: with no previous inventory,
/// every intended resource must either be absent, or already carry the OPM
/// managed-by label (unless `force` adopts it). Terminating objects are
/// always an error.
#[instrument(skip_all, fields(resources = resources.len()))]
pub async fn preflight(client: &Client, resources: &[Resource], opts: &ApplyOpts) -> Result<()> {
    for r in resources {
        let ar = api_resource(r.group(), r.version(), &r.kind);
        let api = dynamic_api(client, &ar, &r.kind, r.namespace());
        let Some(live) = api.get_opt(r.name()).await? else {
            continue;
        };
        if live.metadata.deletion_timestamp.is_some() {
            return Err(Error::Terminating {
                kind: r.kind.clone(),
                namespace: r.namespace().to_string(),
                name: r.name().to_string(),
            });
        }
        let managed = live
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(MANAGED_BY_KEY))
            .is_some_and(|v| v == MANAGED_BY_VALUE);
        if !managed && !opts.force {
            return Err(Error::Untracked {
                kind: r.kind.clone(),
                namespace: r.namespace().to_string(),
                name: r.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Apply_all server-side applies resources in forward order, one at a time
/// to preserve ordering, classifying each outcome.
#[instrument(skip_all, fields(resources = resources.len(), dry_run = opts.dry_run))]
pub async fn apply_all(
    client: &Client,
    resources: &[Resource],
    opts: &ApplyOpts,
    cancel: &CancellationToken,
) -> Result<Vec<Applied>> {
    let mut pp = PatchParams::apply(FIELD_MANAGER).force();
    pp.dry_run = opts.dry_run;

    let mut out = Vec::with_capacity(resources.len());
    for r in resources {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        let ar = api_resource(r.group(), r.version(), &r.kind);
        let api = dynamic_api(client, &ar, &r.kind, r.namespace());
        let obj: DynamicObject = serde_json::from_value(serde_json::to_value(r)?)?;

        let prior = api.get_opt(r.name()).await?;
        let prior_version = prior.and_then(|o| o.metadata.resource_version);
        let next = api
            .patch(r.name(), &pp, &Patch::Apply(&obj))
            .await
            .map_err(conflict_or)?;

        let action = match &prior_version {
            None => ApplyAction::Created,
            Some(prior) if next.metadata.resource_version.as_ref() != Some(prior) => {
                ApplyAction::Configured
            }
            Some(_) => ApplyAction::Unchanged,
        };
        debug!(scope = scope(&r.kind, r.namespace(), r.name()), %action, "applied");
        out.push(Applied {
            scope: scope(&r.kind, r.namespace(), r.name()),
            action,
        });
    }
    Ok(out)
}

/// Delete_entries deletes tracked resources with foreground propagation.
/// The caller passes entries already in reverse total order; a 404 is
/// success.
#[instrument(skip_all, fields(entries = entries.len(), dry_run = dry_run))]
pub async fn delete_entries(
    client: &Client,
    entries: &[InventoryEntry],
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<Vec<Applied>> {
    let mut dp = DeleteParams {
        propagation_policy: Some(PropagationPolicy::Foreground),
        ..Default::default()
    };
    dp.dry_run = dry_run;

    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        if cancel.is_cancelled() {
            return Err(Error::Canceled);
        }
        let ar = api_resource(&e.group, &e.version, &e.kind);
        let api = dynamic_api(client, &ar, &e.kind, &e.namespace);
        match api.delete(&e.name, &dp).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                trace!(name = e.name, "already gone");
            }
            Err(err) => return Err(err.into()),
        }
        out.push(Applied {
            scope: scope(&e.kind, &e.namespace, &e.name),
            action: ApplyAction::Deleted,
        });
    }
    Ok(out)
}

fn conflict_or(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::ApplyConflict(ae.message),
        err => err.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plural_table_and_fallback() {
        assert_eq!(plural("Deployment"), "deployments");
        assert_eq!(plural("Ingress"), "ingresses");
        assert_eq!(plural("NetworkPolicy"), "networkpolicies");
        assert_eq!(plural("StorageClass"), "storageclasses");
        assert_eq!(plural("Endpoints"), "endpoints");
        assert_eq!(plural("ConfigMap"), "configmaps");
    }

    #[test]
    fn api_resource_carries_group_and_plural() {
        let ar = api_resource("apps", "v1", "Deployment");
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.plural, "deployments");
        let ar = api_resource("", "v1", "Service");
        assert_eq!(ar.api_version, "v1");
        assert_eq!(ar.plural, "services");
    }

    #[test]
    fn scopes() {
        assert_eq!(scope("Deployment", "default", "web"), "Deployment/default/web");
        assert_eq!(scope("Namespace", "", "prod"), "Namespace/prod");
    }
}
