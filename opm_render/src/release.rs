//! Module `release` compiles a module plus effective values into a
//! concrete release.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path as FsPath;

use tracing::{debug, instrument, trace};
use uuid::Uuid;

use opm_api::metadata::{ModuleMetadata, NAMESPACE_OPM, ReleaseMetadata};
use opm_api::labels::release_label;
use opm_cue::ast::{self, BinOp, Key, StrPart};
use opm_cue::{Context, FieldIter, LoadOptions, Value};

use crate::{Error, Result};

/// MODULE_MARKER is the directory every module carries next to its sources.
pub static MODULE_MARKER: &str = "cue.mod";

/// VALUES_FILE is the author-defaults file every module must carry.
pub static VALUES_FILE: &str = "values.cue";

// The hidden field the release overlay computes identity under.
const OVERLAY_FIELD: &str = "opm_release";

/// ReleaseOptions parameterizes a build.
#[derive(Clone, Debug, Default)]
pub struct ReleaseOptions {
    /// Name is the release name.
    pub name: String,
    /// Namespace is the target namespace.
    pub namespace: String,
    /// Values_files are user-supplied values overlays; when present they
    /// replace the author defaults entirely.
    pub values_files: Vec<std::path::PathBuf>,
    /// Registry points module loads at a registry.
    pub registry: Option<String>,
}

/// LoadedComponent is one concrete component of a built release.
#[derive(Clone, Debug)]
pub struct LoadedComponent {
    /// Name is the component name.
    pub name: String,
    /// Labels are the component's effective labels.
    pub labels: BTreeMap<String, String>,
    /// Annotations are the component's annotations.
    pub annotations: BTreeMap<String, String>,
    /// Resources maps resource FQNs to their values.
    pub resources: BTreeMap<String, Value>,
    /// Traits maps trait FQNs to their values.
    pub traits: BTreeMap<String, Value>,
    /// Value is the component's whole evaluator value.
    pub value: Value,
}

/// BuiltRelease is the output of [`build`]: identity metadata plus fully
/// concrete components.
#[derive(Clone, Debug)]
pub struct BuiltRelease {
    /// Module is the module identity.
    pub module: ModuleMetadata,
    /// Release is the release identity.
    pub release: ReleaseMetadata,
    /// Components are the loaded components.
    pub components: Vec<LoadedComponent>,
    /// Values is the resolved values text recorded in the inventory.
    pub values: String,
}

/// Inspection is what [`inspect`] reads from a module without evaluation.
#[derive(Clone, Debug, Default)]
pub struct Inspection {
    /// Name is `metadata.name` when statically declared.
    pub name: Option<String>,
    /// Default_namespace is `metadata.defaultNamespace` when statically
    /// declared.
    pub default_namespace: Option<String>,
    /// Package is the package clause.
    pub package: Option<String>,
}

/// Validate_module_dir checks the module directory shape before any
/// evaluation: it exists, carries the module marker directory, and has a
/// values file.
pub fn validate_module_dir(dir: &FsPath) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidModule {
        path: dir.to_path_buf(),
        reason: reason.to_string(),
    };
    if !dir.is_dir() {
        return Err(invalid("not a directory"));
    }
    if !dir.join(MODULE_MARKER).is_dir() {
        return Err(invalid("missing cue.mod directory"));
    }
    if !dir.join(VALUES_FILE).is_file() {
        return Err(invalid("missing values.cue"));
    }
    Ok(())
}

/// Inspect reads static module metadata by walking the parsed syntax trees,
/// without evaluating anything. Fields declared as expressions come back
/// `None`; callers fall back to a full evaluation.
pub fn inspect(dir: &FsPath) -> Result<Inspection> {
    let mut out = Inspection::default();
    let mut names = module_sources(dir)?;
    names.sort();
    for name in names {
        let src = fs::read_to_string(dir.join(&name)).map_err(opm_cue::Error::Io)?;
        let file = opm_cue::parse_file(&name, &src)?;
        if out.package.is_none() {
            out.package = file.package.clone();
        }
        if let Some(metadata) = find_struct(&file.decls, "metadata") {
            if out.name.is_none() {
                out.name = static_string(metadata, "name");
            }
            if out.default_namespace.is_none() {
                out.default_namespace = static_string(metadata, "defaultNamespace");
            }
        }
    }
    Ok(out)
}

fn module_sources(dir: &FsPath) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(opm_cue::Error::Io)? {
        let entry = entry.map_err(opm_cue::Error::Io)?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".cue") && !name.starts_with("values") {
            names.push(name);
        }
    }
    Ok(names)
}

fn find_struct<'d>(decls: &'d [ast::Decl], name: &str) -> Option<&'d [ast::Decl]> {
    decls.iter().find_map(|d| {
        let ast::Decl::Field { key, value, .. } = d;
        if key.kind == ast::KeyKind::Regular && key.name == name {
            match value {
                ast::Expr::Struct(inner) => Some(inner.as_slice()),
                _ => None,
            }
        } else {
            None
        }
    })
}

fn static_string(decls: &[ast::Decl], name: &str) -> Option<String> {
    decls.iter().find_map(|d| {
        let ast::Decl::Field { key, value, .. } = d;
        if key.kind == ast::KeyKind::Regular && key.name == name {
            match value {
                ast::Expr::String(parts) => match parts.as_slice() {
                    [StrPart::Lit(s)] => Some(s.clone()),
                    _ => None,
                },
                _ => None,
            }
        } else {
            None
        }
    })
}

/// Build compiles the module at `dir` into a [`BuiltRelease`].
#[instrument(skip_all, fields(module = %dir.display(), release = opts.name))]
pub fn build(ctx: &Context, dir: &FsPath, opts: &ReleaseOptions) -> Result<BuiltRelease> {
    validate_module_dir(dir)?;

    let inspection = inspect(dir)?;
    let package = inspection.package.clone();
    trace!(?inspection, "inspected module sources");

    // The identity overlay is generated as a syntax tree and loaded as one
    // more file of the package.
    let overlay = release_overlay(package.clone(), &opts.name, &opts.namespace);
    let module = opm_cue::load(
        ctx,
        dir,
        LoadOptions {
            package,
            exclude: vec!["values*.cue".into()],
            overlays: vec![overlay],
            registry: opts.registry.clone(),
        },
    )
    .map_err(Error::ModuleLoad)?;

    // Approach A: user-supplied values replace the author defaults; the
    // defaults only load when no user file is given.
    let mut module = module;
    let mut values_text = String::new();
    if opts.values_files.is_empty() {
        let src = fs::read_to_string(dir.join(VALUES_FILE)).map_err(opm_cue::Error::Io)?;
        values_text.push_str(&src);
        let defaults = ctx.compile(VALUES_FILE, &src).map_err(Error::ModuleLoad)?;
        module = module.unify(&defaults);
    } else {
        for path in &opts.values_files {
            let src = fs::read_to_string(path).map_err(opm_cue::Error::Io)?;
            values_text.push_str(&src);
            let overlay = ctx
                .compile(&path.display().to_string(), &src)
                .map_err(Error::ModuleLoad)?;
            module = module.unify(&overlay);
        }
    }

    // Injecting the effective values into the #config path makes every
    // component field that referenced #config concrete.
    let values = module.lookup_path("values").map_err(Error::ModuleLoad)?;
    let module = module.fill_path("#config", &values);
    debug!("injected effective values into #config");

    let components = extract_components(&module)?;
    let component_names: Vec<String> = components.iter().map(|c| c.name.clone()).collect();

    let mut abstract_paths = Vec::new();
    for c in &components {
        if let Err(opm_cue::Error::NotConcrete(paths)) = c.value.validate_concrete() {
            abstract_paths.extend(paths.into_iter().map(|p| format!("{}.{p}", c.name)));
        }
    }
    if !abstract_paths.is_empty() {
        return Err(Error::ReleaseValidation {
            paths: abstract_paths,
        });
    }

    let module_meta = module_metadata(&module, &component_names)?;
    let release_meta = release_metadata(&module, opts, &component_names)?;

    Ok(BuiltRelease {
        module: module_meta,
        release: release_meta,
        components,
        values: values_text,
    })
}

fn extract_components(module: &Value) -> Result<Vec<LoadedComponent>> {
    let components = module
        .lookup_path("#components")
        .map_err(Error::ModuleLoad)?;
    let mut out = Vec::new();
    for (sel, value) in components.fields(FieldIter::default())? {
        let name = sel.name();
        let labels = decode_string_map(&value, "labels");
        let annotations = decode_string_map(&value, "annotations");
        let resources = keyed_values(&value, "resources");
        let traits = keyed_values(&value, "traits");
        trace!(
            component = name,
            resources = resources.len(),
            traits = traits.len(),
            "extracted component"
        );
        out.push(LoadedComponent {
            name,
            labels,
            annotations,
            resources,
            traits,
            value,
        });
    }
    Ok(out)
}

fn decode_string_map(value: &Value, field: &str) -> BTreeMap<String, String> {
    value
        .lookup_path(field)
        .ok()
        .and_then(|v| v.decode().ok())
        .unwrap_or_default()
}

fn keyed_values(value: &Value, field: &str) -> BTreeMap<String, Value> {
    let Ok(v) = value.lookup_path(field) else {
        return BTreeMap::new();
    };
    v.fields(FieldIter::default())
        .map(|fields| {
            fields
                .into_iter()
                .map(|(sel, v)| (sel.name(), v))
                .collect()
        })
        .unwrap_or_default()
}

fn module_metadata(module: &Value, components: &[String]) -> Result<ModuleMetadata> {
    let meta = module.lookup_path("metadata").map_err(Error::ModuleLoad)?;
    let string = |field: &str| -> Result<String> {
        meta.lookup_path(field)
            .and_then(|v| v.as_string())
            .map_err(Error::ModuleLoad)
    };
    let fqn = string("fqn")?;
    // The module-identity UUID is the declared identity, or derived from
    // the FQN when the module does not declare one.
    let uuid = meta
        .lookup_path("identity")
        .and_then(|v| v.as_string())
        .unwrap_or_else(|_| Uuid::new_v5(&NAMESPACE_OPM, fqn.as_bytes()).to_string());
    Ok(ModuleMetadata {
        name: string("name")?,
        version: string("version")?,
        fqn,
        uuid,
        labels: meta
            .lookup_path("labels")
            .ok()
            .and_then(|v| v.decode().ok())
            .unwrap_or_default(),
        components: components.to_vec(),
    })
}

fn release_metadata(
    module: &Value,
    opts: &ReleaseOptions,
    components: &[String],
) -> Result<ReleaseMetadata> {
    let overlay = module
        .lookup_path(format!("_{OVERLAY_FIELD}").as_str())
        .map_err(Error::ModuleLoad)?;
    let uuid = overlay
        .lookup_path("id")
        .and_then(|v| v.as_string())
        .map_err(Error::ModuleLoad)?;
    let labels: BTreeMap<String, String> = overlay
        .lookup_path("mergedLabels")
        .and_then(|v| v.decode())
        .map_err(Error::ModuleLoad)?;
    Ok(ReleaseMetadata {
        name: opts.name.clone(),
        namespace: opts.namespace.clone(),
        uuid,
        labels,
        components: components.to_vec(),
    })
}

// The overlay computes the release identity inside the language so every
// client derives identical results: a UUIDv5 over the module FQN, release
// name, and namespace, plus the release standard labels and the merge with
// the module's own labels.
fn release_overlay(package: Option<String>, name: &str, namespace: &str) -> ast::File {
    let uuid_call = ast::call(
        ast::sel(ast::ident("uuid"), &["SHA1"]),
        [
            ast::str(NAMESPACE_OPM.to_string()),
            ast::interp([
                StrPart::Interp(ast::sel(ast::ident("metadata"), &["fqn"])),
                StrPart::Lit(format!(":{name}:{namespace}")),
            ]),
        ],
    );
    let labels = ast::strukt([
        ast::field(Key::regular(release_label("name")), ast::str(name)),
        ast::field(
            Key::regular(release_label("version")),
            ast::sel(ast::ident("metadata"), &["version"]),
        ),
        ast::field(Key::regular(release_label("uuid")), ast::ident("id")),
    ]);
    // metadata.labels may be absent; the default branch falls back to the
    // release labels alone.
    let merged = ast::binary(
        BinOp::Or,
        ast::default(ast::binary(
            BinOp::And,
            ast::sel(ast::ident("metadata"), &["labels"]),
            ast::ident("labels"),
        )),
        ast::ident("labels"),
    );
    ast::File {
        filename: "opm_release_overlay.cue".into(),
        package,
        imports: vec!["uuid".into()],
        decls: vec![ast::field(
            Key::hidden(OVERLAY_FIELD),
            ast::strukt([
                ast::field(Key::regular("id"), uuid_call),
                ast::field(Key::regular("labels"), labels),
                ast::field(Key::regular("mergedLabels"), merged),
            ]),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_module(dir: &FsPath) {
        fs::create_dir_all(dir.join(MODULE_MARKER)).unwrap();
        fs::write(
            dir.join("module.cue"),
            "package hello\n\n\
             metadata: {\n\
             \tname:             \"hello\"\n\
             \tfqn:              \"opm.example/hello@v0\"\n\
             \tversion:          \"0.1.0\"\n\
             \tdefaultNamespace: \"default\"\n\
             \tlabels: {}\n\
             }\n\n\
             #config: {\n\
             \treplicaCount: int & >=1\n\
             \timage:        string\n\
             }\n\n\
             values: #config\n\n\
             #components: web: {\n\
             \tlabels: \"workload-type\": \"stateless\"\n\
             \tresources: \"opm.dev/core#Container\": {\n\
             \t\timage:    #config.image\n\
             \t\treplicas: #config.replicaCount\n\
             \t}\n\
             }\n",
        )
        .unwrap();
        fs::write(
            dir.join(VALUES_FILE),
            "package hello\n\nvalues: {\n\treplicaCount: 1\n\timage: \"nginx:latest\"\n}\n",
        )
        .unwrap();
    }

    #[test]
    fn validates_module_shape() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate_module_dir(dir.path()),
            Err(Error::InvalidModule { .. })
        ));
        write_module(dir.path());
        validate_module_dir(dir.path()).unwrap();
    }

    #[test]
    fn inspects_static_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path());
        let got = inspect(dir.path()).unwrap();
        assert_eq!(got.name.as_deref(), Some("hello"));
        assert_eq!(got.default_namespace.as_deref(), Some("default"));
        assert_eq!(got.package.as_deref(), Some("hello"));
    }

    #[test]
    fn inspection_skips_computed_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path());
        fs::write(
            dir.path().join("module.cue"),
            "package hello\n\nmetadata: {\n\tname: \"he\" + \"llo\"\n}\n",
        )
        .unwrap();
        let got = inspect(dir.path()).unwrap();
        assert_eq!(got.name, None);
    }

    #[test]
    fn builds_with_author_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path());
        let ctx = Context::new();
        let built = build(
            &ctx,
            dir.path(),
            &ReleaseOptions {
                name: "hello".into(),
                namespace: "default".into(),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(built.module.name, "hello");
        assert_eq!(built.module.fqn, "opm.example/hello@v0");
        assert_eq!(
            built.release.uuid,
            "70291328-d618-5a2f-ac7e-2d6ddda02f43",
        );
        assert_eq!(built.components.len(), 1);
        let web = &built.components[0];
        assert_eq!(web.name, "web");
        assert_eq!(
            web.labels.get("workload-type").map(String::as_str),
            Some("stateless"),
        );
        assert!(web.resources.contains_key("opm.dev/core#Container"));
        assert_eq!(
            built.release.labels.get("module-release.opmodel.dev/uuid"),
            Some(&built.release.uuid),
        );
    }

    #[test]
    fn user_values_replace_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path());
        let values = dir.path().join("user-values.cue");
        fs::write(
            &values,
            "values: {\n\treplicaCount: 3\n\timage: \"nginx:1.28\"\n}\n",
        )
        .unwrap();

        let ctx = Context::new();
        let built = build(
            &ctx,
            dir.path(),
            &ReleaseOptions {
                name: "hello".into(),
                namespace: "default".into(),
                values_files: vec![values],
                ..Default::default()
            },
        )
        .unwrap();
        let container = built.components[0]
            .resources
            .get("opm.dev/core#Container")
            .unwrap();
        assert_eq!(
            container.lookup_path("replicas").unwrap().as_int().unwrap(),
            3,
        );
        assert_eq!(
            container.lookup_path("image").unwrap().as_string().unwrap(),
            "nginx:1.28",
        );
    }

    #[test]
    fn missing_required_value_lists_the_path() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path());
        let values = dir.path().join("user-values.cue");
        fs::write(&values, "values: replicaCount: 3\n").unwrap();

        let ctx = Context::new();
        let err = build(
            &ctx,
            dir.path(),
            &ReleaseOptions {
                name: "hello".into(),
                namespace: "default".into(),
                values_files: vec![values],
                ..Default::default()
            },
        )
        .unwrap_err();
        match err {
            Error::ReleaseValidation { paths } => {
                assert!(paths.iter().any(|p| p.contains("image")), "{paths:?}");
            }
            err => panic!("unexpected: {err}"),
        }
    }
}
