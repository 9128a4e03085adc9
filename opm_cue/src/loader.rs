//! Module `loader` reads a package from a directory.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::Path as FsPath;

use tracing::{debug, trace};

use crate::ast::File;
use crate::value::{Context, Value};
use crate::{Error, REGISTRY_ENV, Result, parser};

/// LoadOptions configures a package load.
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Package restricts the load to files of this package; when unset the
    /// first file's package clause decides.
    pub package: Option<String>,
    /// Exclude lists filename patterns (one `*` wildcard allowed) to skip,
    /// e.g. `values*.cue`.
    pub exclude: Vec<String>,
    /// Overlays are additional synthesized files unified into the package.
    pub overlays: Vec<File>,
    /// Registry points the evaluator's import resolver at a module
    /// registry for the duration of the load.
    pub registry: Option<String>,
}

/// Load reads every `.cue` file of one package from a directory, unifies
/// them with any overlays, and builds the package value.
pub fn load(ctx: &Context, dir: &FsPath, opts: LoadOptions) -> Result<Value> {
    let _registry = opts.registry.as_deref().map(RegistryGuard::set);

    let mut names: Vec<OsString> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let text = name.to_string_lossy();
        if !text.ends_with(".cue") {
            continue;
        }
        if opts.exclude.iter().any(|p| name_matches(p, &text)) {
            trace!(file = %text, "excluded from load");
            continue;
        }
        names.push(name);
    }
    // Deterministic load order.
    names.sort();
    if names.is_empty() && opts.overlays.is_empty() {
        return Err(Error::Load(format!(
            "no .cue files in {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    let mut package = opts.package.clone();
    for name in &names {
        let path = dir.join(name);
        let src = fs::read_to_string(&path)?;
        let file = parser::parse_file(&path.display().to_string(), &src)?;
        match (&package, &file.package) {
            (None, Some(p)) => package = Some(p.clone()),
            (Some(want), Some(have)) if want != have => {
                debug!(file = %path.display(), package = %have, "skipping foreign package");
                continue;
            }
            _ => {}
        }
        files.push(file);
    }
    files.extend(opts.overlays.iter().cloned());

    ctx.build_files(files)
}

fn name_matches(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((pre, post)) => {
            name.len() >= pre.len() + post.len()
                && name.starts_with(pre)
                && name.ends_with(post)
        }
        None => pattern == name,
    }
}

// Sets the registry environment variable for the duration of a load and
// restores the previous state on return. The evaluator is single-owner, so
// the process-global write is not racing other threads.
struct RegistryGuard {
    prev: Option<OsString>,
}

impl RegistryGuard {
    fn set(registry: &str) -> RegistryGuard {
        let prev = env::var_os(REGISTRY_ENV);
        unsafe { env::set_var(REGISTRY_ENV, registry) };
        RegistryGuard { prev }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        match self.prev.take() {
            Some(v) => unsafe { env::set_var(REGISTRY_ENV, v) },
            None => unsafe { env::remove_var(REGISTRY_ENV) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_by_pattern() {
        assert!(name_matches("values*.cue", "values.cue"));
        assert!(name_matches("values*.cue", "values-prod.cue"));
        assert!(!name_matches("values*.cue", "module.cue"));
        assert!(name_matches("module.cue", "module.cue"));
    }

    #[test]
    fn loads_a_package_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.cue"), "package t\n\nname: \"web\"\n").unwrap();
        fs::write(dir.path().join("b.cue"), "package t\n\nport: 8080\n").unwrap();
        fs::write(dir.path().join("values.cue"), "package t\n\nname: \"BAD\"\n").unwrap();

        let ctx = Context::new();
        let v = load(
            &ctx,
            dir.path(),
            LoadOptions {
                exclude: vec!["values*.cue".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(v.lookup_path("name").unwrap().as_string().unwrap(), "web");
        assert_eq!(v.lookup_path("port").unwrap().as_int().unwrap(), 8080);
    }

    #[test]
    fn registry_env_is_scoped_to_the_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.cue"), "package t\n\nx: 1\n").unwrap();
        let ctx = Context::new();
        load(
            &ctx,
            dir.path(),
            LoadOptions {
                registry: Some("registry.example/modules".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(env::var_os(REGISTRY_ENV).is_none());
    }

    #[test]
    fn foreign_imports_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.cue"),
            "package t\n\nimport \"example.com/dep\"\n\nx: 1\n",
        )
        .unwrap();
        let ctx = Context::new();
        match load(&ctx, dir.path(), LoadOptions::default()) {
            Err(Error::Import(path)) => assert_eq!(path, "example.com/dep"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
