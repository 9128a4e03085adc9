//! Cluster-backed apply scenarios. These need a reachable cluster (see
//! `cargo xtask ci`) and are ignored otherwise.

use std::fs;

use tokio_util::sync::CancellationToken;

use cli::apply::{self, ApplyAction, ApplyOpts};
use cli::inventory;
use cli::render::{RenderFlags, render};
use opm_api::inventory::DEFAULT_HISTORY_LIMIT;
use opm_api::{ChangeEntry, Inventory, InventoryEntry};

mod util;

async fn apply_once(
    cfg: &cli::config::GlobalConfig,
    module_dir: &std::path::Path,
) -> (kube::Client, cli::render::Rendered, Vec<apply::Applied>, Inventory) {
    let rendered = render(cfg, module_dir, &RenderFlags::default()).unwrap();
    assert!(rendered.errors.is_empty(), "{:?}", rendered.errors);

    let client = kube::Client::try_default().await.unwrap();
    let cancel = CancellationToken::new();
    let previous = inventory::discover(&client, &rendered.built.release)
        .await
        .unwrap();
    if previous.is_none() {
        apply::preflight(&client, &rendered.resources, &ApplyOpts::default())
            .await
            .unwrap();
    }
    let statuses = apply::apply_all(
        &client,
        &rendered.resources,
        &ApplyOpts::default(),
        &cancel,
    )
    .await
    .unwrap();

    let current: Vec<InventoryEntry> =
        rendered.resources.iter().map(InventoryEntry::from).collect();
    let previous_entries = previous
        .as_ref()
        .map(|p| p.entries().to_vec())
        .unwrap_or_default();
    let stale = inventory::prunable(&previous_entries, &current);
    apply::delete_entries(&client, &stale, false, &cancel)
        .await
        .unwrap();

    let mut inv = previous.unwrap_or_else(|| {
        Inventory::new(
            rendered.built.module.clone(),
            rendered.built.release.clone(),
        )
    });
    inv.record(
        ChangeEntry {
            module: module_dir.display().to_string(),
            module_version: rendered.built.module.version.clone(),
            values: rendered.built.values.clone(),
            digest: rendered.digest.clone(),
            timestamp: chrono::Utc::now(),
            entries: current,
        },
        DEFAULT_HISTORY_LIMIT,
    );
    let inv = inventory::write(&client, &inv).await.unwrap();
    (client, rendered, statuses, inv)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[cfg_attr(not(feature = "test_ci"), ignore)]
async fn idempotent_reapply_is_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("hello");
    util::write_module(&module_dir, util::MODULE);
    let config_path = util::write_config(dir.path());
    let cfg = util::load_config(&config_path);

    let (_, _, first, inv) = apply_once(&cfg, &module_dir).await;
    assert!(
        first
            .iter()
            .all(|a| a.action == ApplyAction::Created || a.action == ApplyAction::Configured),
    );
    assert_eq!(inv.index.len(), 1);

    let (client, _, second, inv2) = apply_once(&cfg, &module_dir).await;
    assert!(second.iter().all(|a| a.action == ApplyAction::Unchanged));
    assert_eq!(inv2.index.len(), 1);
    assert_eq!(inv.index, inv2.index);

    // Cleanup.
    let cancel = CancellationToken::new();
    let ordered = inventory::delete_order(inv2.entries());
    apply::delete_entries(&client, &ordered, false, &cancel)
        .await
        .unwrap();
    inventory::remove(&client, &inv2).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[cfg_attr(not(feature = "test_ci"), ignore)]
async fn removed_component_is_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("hello");
    util::write_module(&module_dir, util::MODULE_WITH_DB);
    let config_path = util::write_config(dir.path());
    let cfg = util::load_config(&config_path);

    let (_, _, _, inv) = apply_once(&cfg, &module_dir).await;
    assert_eq!(inv.entries().len(), 2);

    // Drop the db component and re-apply.
    fs::write(module_dir.join("module.cue"), util::MODULE).unwrap();
    let (client, _, statuses, inv2) = apply_once(&cfg, &module_dir).await;
    assert!(statuses.iter().all(|a| a.action == ApplyAction::Unchanged));
    assert_eq!(inv2.entries().len(), 1);

    let api: kube::Api<kube::api::DynamicObject> = kube::Api::namespaced_with(
        client.clone(),
        "default",
        &apply::api_resource("apps", "v1", "Deployment"),
    );
    assert!(api.get_opt("db").await.unwrap().is_none());
    assert!(api.get_opt("web").await.unwrap().is_some());

    // Cleanup.
    let cancel = CancellationToken::new();
    let ordered = inventory::delete_order(inv2.entries());
    apply::delete_entries(&client, &ordered, false, &cancel)
        .await
        .unwrap();
    inventory::remove(&client, &inv2).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[cfg_attr(not(feature = "test_ci"), ignore)]
async fn delete_empties_the_release() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("hello");
    util::write_module(&module_dir, util::MODULE);
    let config_path = util::write_config(dir.path());
    let cfg = util::load_config(&config_path);

    let (client, _, _, inv) = apply_once(&cfg, &module_dir).await;
    let cancel = CancellationToken::new();
    let ordered = inventory::delete_order(inv.entries());
    let deleted = apply::delete_entries(&client, &ordered, false, &cancel)
        .await
        .unwrap();
    assert_eq!(deleted.len(), inv.entries().len());
    inventory::remove(&client, &inv).await.unwrap();

    // A second delete is idempotent: every 404 is success.
    apply::delete_entries(&client, &ordered, false, &cancel)
        .await
        .unwrap();
    assert!(
        inventory::discover_by_name(&client, "default", "hello")
            .await
            .unwrap()
            .is_none(),
    );
}
