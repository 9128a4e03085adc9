//! Module `executor` runs matched transformers and normalizes their output
//! into Kubernetes resources.
//!
//! Execution is strictly sequential: the evaluator host is not safe for
//! concurrent use, and the contract here leans on that.

use serde_json::{Map, Value as Json, json};
use tracing::{debug, instrument, trace};

use opm_api::labels::standard_labels;
use opm_api::resource::{Origin, Resource, cluster_scoped};
use opm_cue::Context;

use crate::matcher::Match;
use crate::release::BuiltRelease;
use crate::{Error, Result};

/// ExecOutput is the outcome of executing a match set: the rendered
/// resources plus every failure, collected fail-on-end.
#[derive(Debug, Default)]
pub struct ExecOutput {
    /// Resources are the rendered resources, in job order.
    pub resources: Vec<Resource>,
    /// Errors are the collected transformer failures.
    pub errors: Vec<Error>,
}

/// Execute runs every (transformer, component) job in order.
#[instrument(skip_all, fields(jobs = matches.len()))]
pub fn execute(ctx: &Context, release: &BuiltRelease, matches: &[Match<'_>]) -> ExecOutput {
    let mut out = ExecOutput::default();
    for m in matches {
        match run_one(ctx, release, m) {
            Ok(resources) => out.resources.extend(resources),
            Err(err) => {
                debug!(
                    transformer = m.transformer.fqn,
                    component = m.component.name,
                    error = %err,
                    "transformer failed"
                );
                out.errors.push(err);
            }
        }
    }
    out
}

fn run_one(ctx: &Context, release: &BuiltRelease, m: &Match<'_>) -> Result<Vec<Resource>> {
    let fail = |reason: String| Error::TransformFailure {
        transformer: m.transformer.fqn.clone(),
        component: m.component.name.clone(),
        reason,
    };

    let transform = m
        .transformer
        .value
        .lookup_path("#transform")
        .map_err(|err| fail(format!("no #transform expression: {err}")))?;

    let transform = transform.fill_path("#component", &m.component.value);
    let transform = inject_context(ctx, release, m, &transform);

    let output = transform
        .lookup_path("output")
        .map_err(|err| fail(format!("no output expression: {err}")))?;
    let doc = output.to_json().map_err(|err| fail(err.to_string()))?;

    let mut resources = Vec::new();
    match doc {
        Json::Array(items) => {
            for item in items {
                resources.push(decode_resource(release, m, item).map_err(fail)?);
            }
        }
        Json::Object(ref obj) if obj.contains_key("apiVersion") => {
            resources.push(decode_resource(release, m, doc).map_err(fail)?);
        }
        Json::Object(obj) => {
            // A name-to-resource mapping; map keys are already sorted.
            for (name, mut item) in obj {
                if let Some(meta) = ensure_object(&mut item, "metadata") {
                    meta.entry("name").or_insert_with(|| json!(name));
                }
                resources.push(decode_resource(release, m, item).map_err(fail)?);
            }
        }
        other => {
            return Err(fail(format!(
                "output must be a resource, list, or name map; got {}",
                kind_of(&other)
            )));
        }
    }
    trace!(
        transformer = m.transformer.fqn,
        component = m.component.name,
        resources = resources.len(),
        "transformed"
    );
    Ok(resources)
}

// The transformer context carries the release identity and the component
// identity; transformers read these to label and name their output.
fn inject_context(
    ctx: &Context,
    release: &BuiltRelease,
    m: &Match<'_>,
    transform: &opm_cue::Value,
) -> opm_cue::Value {
    let context = ctx.encode(&json!({
        "name": release.release.name,
        "namespace": release.release.namespace,
    }));
    let release_meta = ctx.encode(&json!({
        "name": release.release.name,
        "namespace": release.release.namespace,
        "fqn": release.module.fqn,
        "version": release.module.version,
        "uuid": release.release.uuid,
        "labels": release.release.labels,
    }));
    let component_meta = ctx.encode(&json!({
        "name": m.component.name,
        "labels": m.component.labels,
        "annotations": m.component.annotations,
    }));
    transform
        .fill_path("#context", &context)
        .fill_path("#context.#moduleReleaseMetadata", &release_meta)
        .fill_path("#context.#componentMetadata", &component_meta)
}

fn decode_resource(
    release: &BuiltRelease,
    m: &Match<'_>,
    mut doc: Json,
) -> std::result::Result<Resource, String> {
    normalize(&mut doc);
    stamp_metadata(release, m, &mut doc);

    let mut resource: Resource = serde_json::from_value(doc).map_err(|err| err.to_string())?;
    if resource.api_version.is_empty() || resource.kind.is_empty() {
        return Err("resource is missing apiVersion or kind".to_string());
    }
    if resource.name().is_empty() {
        return Err("resource is missing metadata.name".to_string());
    }
    resource.origin = Origin {
        component: m.component.name.clone(),
        transformer: m.transformer.fqn.clone(),
    };
    Ok(resource)
}

// Stamps the standard labels and the target namespace. Label propagation
// happens here, during rendering, never at apply time; the manifest digest
// covers the full labeled form.
fn stamp_metadata(release: &BuiltRelease, m: &Match<'_>, doc: &mut Json) {
    let kind = doc
        .get("kind")
        .and_then(Json::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(meta) = ensure_object(doc, "metadata") else {
        return;
    };
    if !cluster_scoped(&kind) && !meta.contains_key("namespace") {
        meta.insert("namespace".into(), json!(release.release.namespace));
    }

    let labels = standard_labels(&release.module, &release.release, &m.component.name);
    let entry = meta.entry("labels").or_insert_with(|| json!({}));
    if let Some(obj) = entry.as_object_mut() {
        for (k, v) in labels {
            obj.insert(k, json!(v));
        }
    }

    // Annotation values of non-string scalar types are coerced to strings.
    if let Some(Json::Object(annotations)) = meta.get_mut("annotations") {
        for v in annotations.values_mut() {
            match v {
                Json::Bool(b) => *v = json!(b.to_string()),
                Json::Number(n) => *v = json!(n.to_string()),
                _ => {}
            }
        }
    }
}

/// Normalize rewrites map-shaped authoring collections into the
/// array-shaped collections Kubernetes requires, sorted by key.
pub fn normalize(doc: &mut Json) {
    for path in [&["spec"][..], &["spec", "template", "spec"][..]] {
        let Some(pod) = object_at(doc, path) else {
            continue;
        };
        normalize_pod(pod);
    }
}

fn normalize_pod(spec: &mut Map<String, Json>) {
    map_to_array(spec, "volumes", |name, v| match v {
        Json::Object(mut obj) => {
            obj.entry("name").or_insert_with(|| json!(name));
            Some(Json::Object(obj))
        }
        _ => None,
    });
    for key in ["containers", "initContainers"] {
        if let Some(Json::Array(containers)) = spec.get_mut(key) {
            for c in containers {
                if let Some(c) = c.as_object_mut() {
                    normalize_container(c);
                }
            }
        }
    }
}

fn normalize_container(container: &mut Map<String, Json>) {
    map_to_array(container, "ports", |name, v| match v {
        Json::Number(port) => Some(json!({"name": name, "containerPort": port})),
        Json::Object(mut obj) => {
            obj.entry("name").or_insert_with(|| json!(name));
            Some(Json::Object(obj))
        }
        _ => None,
    });
    map_to_array(container, "env", |name, v| match v {
        Json::String(value) => Some(json!({"name": name, "value": value})),
        Json::Bool(value) => Some(json!({"name": name, "value": value.to_string()})),
        Json::Number(value) => Some(json!({"name": name, "value": value.to_string()})),
        Json::Object(mut obj) => {
            obj.entry("name").or_insert_with(|| json!(name));
            Some(Json::Object(obj))
        }
        _ => None,
    });
    map_to_array(container, "volumeMounts", |name, v| match v {
        Json::String(path) => Some(json!({"name": name, "mountPath": path})),
        Json::Object(mut obj) => {
            obj.entry("name").or_insert_with(|| json!(name));
            Some(Json::Object(obj))
        }
        _ => None,
    });
}

// Converts a map-shaped field into an array, the key becoming the `name`
// field where applicable. Maps iterate in sorted key order, which makes the
// rewrite deterministic. Arrays are left as-is.
fn map_to_array<F>(parent: &mut Map<String, Json>, field: &str, convert: F)
where
    F: Fn(&str, Json) -> Option<Json>,
{
    let Some(Json::Object(_)) = parent.get(field) else {
        return;
    };
    let Some(Json::Object(map)) = parent.remove(field) else {
        return;
    };
    let mut items = Vec::with_capacity(map.len());
    for (name, v) in map {
        if let Some(item) = convert(&name, v) {
            items.push(item);
        }
    }
    parent.insert(field.to_string(), Json::Array(items));
}

fn object_at<'j>(doc: &'j mut Json, path: &[&str]) -> Option<&'j mut Map<String, Json>> {
    let mut cur = doc;
    for key in path {
        cur = cur.as_object_mut()?.get_mut(*key)?;
    }
    cur.as_object_mut()
}

fn ensure_object<'j>(doc: &'j mut Json, key: &str) -> Option<&'j mut Map<String, Json>> {
    let obj = doc.as_object_mut()?;
    obj.entry(key).or_insert_with(|| json!({}));
    obj.get_mut(key)?.as_object_mut()
}

fn kind_of(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
