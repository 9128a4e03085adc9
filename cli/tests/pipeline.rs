use std::fs;

use cli::render::{RenderFlags, render};
use opm_api::InventoryEntry;

mod util;

#[test]
fn renders_through_the_configured_provider() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("hello");
    util::write_module(&module_dir, util::MODULE);
    let config_path = util::write_config(dir.path());
    let cfg = util::load_config(&config_path);

    let values = dir.path().join("user.cue");
    fs::write(&values, "values: {replicaCount: 3, image: \"nginx:1.28\"}\n").unwrap();

    let rendered = render(
        &cfg,
        &module_dir,
        &RenderFlags {
            values: vec![values],
            ..Default::default()
        },
    )
    .unwrap();

    assert!(rendered.errors.is_empty(), "{:?}", rendered.errors);
    assert_eq!(rendered.resources.len(), 1);
    assert_eq!(rendered.built.release.name, "hello");
    assert_eq!(rendered.built.release.namespace, "default");

    let deploy = &rendered.resources[0];
    assert_eq!(deploy.kind, "Deployment");
    assert_eq!(deploy.name(), "web");
    assert_eq!(deploy.body["spec"]["replicas"], serde_json::json!(3));

    // The inventory entry identity derives straight from the resource.
    let entry = InventoryEntry::from(deploy);
    assert_eq!(entry.group, "apps");
    assert_eq!(entry.component, "web");
}

#[test]
fn digest_is_stable_for_identical_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("hello");
    util::write_module(&module_dir, util::MODULE);
    let config_path = util::write_config(dir.path());

    let once = render(
        &util::load_config(&config_path),
        &module_dir,
        &RenderFlags::default(),
    )
    .unwrap();
    let twice = render(
        &util::load_config(&config_path),
        &module_dir,
        &RenderFlags::default(),
    )
    .unwrap();
    assert_eq!(once.digest, twice.digest);
    assert!(once.digest.starts_with("sha256:"));
}

#[test]
fn unmatched_component_is_reported_and_others_render() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("hello");
    let module = util::MODULE.replace(
        "#components: web: {",
        "#components: batch: {\n\
         \tlabels: \"workload-type\": \"job\"\n\
         }\n\n\
         #components: web: {",
    );
    util::write_module(&module_dir, &module);
    let config_path = util::write_config(dir.path());

    let rendered = render(
        &util::load_config(&config_path),
        &module_dir,
        &RenderFlags::default(),
    )
    .unwrap();
    assert_eq!(rendered.resources.len(), 1);
    assert_eq!(rendered.errors.len(), 1);
    let err = cli::Error::from(
        rendered.errors.into_iter().next().unwrap(),
    );
    assert_eq!(err.exit_code(), cli::EXIT_VALIDATION);
}

#[test]
fn release_name_flag_overrides_module_name() {
    let dir = tempfile::tempdir().unwrap();
    let module_dir = dir.path().join("hello");
    util::write_module(&module_dir, util::MODULE);
    let config_path = util::write_config(dir.path());

    let rendered = render(
        &util::load_config(&config_path),
        &module_dir,
        &RenderFlags {
            release_name: Some("hello-staging".into()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(rendered.built.release.name, "hello-staging");
    // A different release name is a different release identity.
    assert_ne!(
        rendered.built.release.uuid,
        "70291328-d618-5a2f-ac7e-2d6ddda02f43",
    );
}
