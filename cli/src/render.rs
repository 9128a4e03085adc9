//! Module `render` drives the pipeline from a module directory to a
//! sorted resource list, and emits manifests.

use std::fs;
use std::io::Write;

use opm_api::resource::sort_forward;
use opm_api::{manifest_digest, resolved::Source};
use opm_render::release::{BuiltRelease, Inspection, ReleaseOptions};
use opm_render::{execute, load_provider, match_components, release};

use crate::prelude::*;

/// RenderFlags are the per-invocation inputs of `mod build` and
/// `mod apply`.
#[derive(Clone, Debug, Default)]
pub struct RenderFlags {
    /// Release_name overrides the module name.
    pub release_name: Option<String>,
    /// Values are the `-f` files, applied in order.
    pub values: Vec<PathBuf>,
}

/// Rendered is everything a command needs after the pipeline ran.
#[derive(Debug)]
pub struct Rendered {
    /// Built is the concrete release.
    pub built: BuiltRelease,
    /// Resources are sorted in forward (apply) order.
    pub resources: Vec<Resource>,
    /// Digest is the order-independent manifest digest.
    pub digest: String,
    /// Errors are the collected render failures; rendering is fail-on-end.
    pub errors: Vec<opm_render::Error>,
    /// Unhandled_traits lists, per component, traits no matched
    /// transformer handles.
    pub unhandled_traits: Vec<(String, Vec<String>)>,
}

/// Render runs build → match → execute → sort for one module.
#[instrument(skip_all, fields(module = %module.display()))]
pub fn render(cfg: &GlobalConfig, module: &Path, flags: &RenderFlags) -> Result<Rendered> {
    release::validate_module_dir(module)?;
    let inspection = release::inspect(module)?;

    let name = release_name(cfg, module, flags, &inspection)?;
    let namespace = namespace(cfg, &inspection);
    info!(release = name, namespace, "rendering module");

    let built = release::build(
        &cfg.cue,
        module,
        &ReleaseOptions {
            name,
            namespace,
            values_files: flags.values.clone(),
            registry: cfg.registry.as_ref().map(|r| r.value.clone()),
        },
    )?;

    let (provider_name, provider_value) = cfg.provider_value()?;
    let provider = load_provider(provider_name, provider_value)?;
    let set = match_components(&built, &provider);

    let mut errors: Vec<opm_render::Error> = set
        .unmatched
        .iter()
        .map(|c| opm_render::Error::UnmatchedComponent {
            component: c.name.clone(),
        })
        .collect();
    let unhandled_traits = set.unhandled_traits();

    let mut out = execute(&cfg.cue, &built, &set.matches);
    errors.append(&mut out.errors);
    sort_forward(&mut out.resources);
    let digest = manifest_digest(&out.resources);
    debug!(
        resources = out.resources.len(),
        errors = errors.len(),
        digest,
        "rendered"
    );

    Ok(Rendered {
        built,
        resources: out.resources,
        digest,
        errors,
        unhandled_traits,
    })
}

// The release name: the flag, a statically declared module name, or the
// evaluated module name when the declaration is an expression.
fn release_name(
    cfg: &GlobalConfig,
    module: &Path,
    flags: &RenderFlags,
    inspection: &Inspection,
) -> Result<String> {
    if let Some(name) = &flags.release_name {
        return Ok(name.clone());
    }
    if let Some(name) = &inspection.name {
        return Ok(name.clone());
    }
    // Fallback: a minimal evaluation of the module sources.
    let value = opm_cue::load(
        &cfg.cue,
        module,
        opm_cue::LoadOptions {
            package: inspection.package.clone(),
            exclude: vec!["values*.cue".into()],
            registry: cfg.registry.as_ref().map(|r| r.value.clone()),
            ..Default::default()
        },
    )?;
    Ok(value.lookup_path("metadata.name")?.as_string()?)
}

// The target namespace: an explicit flag, environment, or config namespace
// wins; the module's declared default beats the built-in fallback.
fn namespace(cfg: &GlobalConfig, inspection: &Inspection) -> String {
    if cfg.namespace.source == Source::Default {
        if let Some(ns) = &inspection.default_namespace {
            return ns.clone();
        }
    }
    cfg.namespace.value.clone()
}

/// Emit writes rendered manifests to a writer: YAML as a multi-document
/// stream, JSON as a single array.
pub fn emit<W: Write>(resources: &[Resource], format: &str, w: &mut W) -> Result<()> {
    match format {
        "json" => {
            serde_json::to_writer_pretty(&mut *w, resources)?;
            writeln!(w)?;
        }
        _ => {
            for (i, r) in resources.iter().enumerate() {
                if i > 0 {
                    writeln!(w, "---")?;
                }
                w.write_all(serde_yaml::to_string(r)?.as_bytes())?;
            }
        }
    }
    Ok(())
}

/// Emit_dir writes manifests into a directory: one file per resource in
/// apply order with `--split`, one manifest file otherwise.
pub fn emit_dir(resources: &[Resource], format: &str, dir: &Path, split: bool) -> Result<()> {
    fs::create_dir_all(dir)?;
    let ext = if format == "json" { "json" } else { "yaml" };
    if !split {
        let mut buf = Vec::new();
        emit(resources, format, &mut buf)?;
        fs::write(dir.join(format!("manifest.{ext}")), buf)?;
        return Ok(());
    }
    for (i, r) in resources.iter().enumerate() {
        let name = format!(
            "{i:02}-{}-{}.{ext}",
            r.kind.to_ascii_lowercase(),
            r.name(),
        );
        let mut buf = Vec::new();
        emit(std::slice::from_ref(r), format, &mut buf)?;
        fs::write(dir.join(name), buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(kind: &str, name: &str) -> Resource {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {"name": name, "namespace": "default"},
        }))
        .unwrap()
    }

    #[test]
    fn yaml_stream_is_multi_document() {
        let mut buf = Vec::new();
        emit(&[res("ConfigMap", "a"), res("Service", "b")], "yaml", &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.matches("---").count(), 1);
        assert!(text.contains("kind: ConfigMap"));
        assert!(text.contains("kind: Service"));
    }

    #[test]
    fn json_is_a_single_array() {
        let mut buf = Vec::new();
        emit(&[res("ConfigMap", "a")], "json", &mut buf).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert!(parsed.is_array());
    }

    #[test]
    fn split_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        emit_dir(
            &[res("ConfigMap", "a"), res("Service", "b")],
            "yaml",
            dir.path(),
            true,
        )
        .unwrap();
        assert!(dir.path().join("00-configmap-a.yaml").is_file());
        assert!(dir.path().join("01-service-b.yaml").is_file());
    }
}
