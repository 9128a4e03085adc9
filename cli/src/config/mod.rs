//! Module `config` holds the two-phase configuration bootstrap and the
//! precedence-resolved runtime configuration.
//!
//! The registry URL is needed to evaluate the config file, but may itself
//! be declared in the config file. The bootstrap phase therefore scans the
//! raw text for the registry with a single pattern and no evaluator call;
//! only the full load phase evaluates the file.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, trace};

use opm_api::resolved::{ResolvedField, Source};
use opm_cue::{Context, FieldIter, Value};

use crate::prelude::*;

/// ENV_CONFIG overrides the config file path.
pub static ENV_CONFIG: &str = "OPM_CONFIG";
/// ENV_REGISTRY overrides the registry URL.
pub static ENV_REGISTRY: &str = "OPM_REGISTRY";
/// ENV_KUBECONFIG overrides the kubeconfig path.
pub static ENV_KUBECONFIG: &str = "OPM_KUBECONFIG";
/// ENV_CONTEXT overrides the kubeconfig context.
pub static ENV_CONTEXT: &str = "OPM_CONTEXT";
/// ENV_NAMESPACE overrides the default namespace.
pub static ENV_NAMESPACE: &str = "OPM_NAMESPACE";

/// CONFIG_SCHEMA is the embedded schema the loaded config must satisfy.
static CONFIG_SCHEMA: &str = include_str!("schema.cue");

/// DEFAULT_CONFIG is what `opm config init` writes.
pub static DEFAULT_CONFIG: &str = r#"// OPM runtime configuration.

registry: "registry.opmodel.dev/modules"

kubernetes: {
	namespace: "default"
}

log: {
	timestamps: false
	warnings:   true
}
"#;

static REGISTRY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*registry:\s*"([^"]+)""#).expect("programmer error: static pattern")
});
static PROVIDERS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*providers:").expect("programmer error: static pattern")
});

/// Flags are the global command-line values feeding precedence resolution.
#[derive(Clone, Debug, Default)]
pub struct Flags {
    /// Config file path from `--config`.
    pub config: Option<String>,
    /// Registry from `--registry`.
    pub registry: Option<String>,
    /// Provider name from `--provider`.
    pub provider: Option<String>,
    /// Kubeconfig path from `--kubeconfig`.
    pub kubeconfig: Option<String>,
    /// Kube context from `--context`.
    pub context: Option<String>,
    /// Namespace from `--namespace`.
    pub namespace: Option<String>,
    /// Output format from `--output`.
    pub output: Option<String>,
    /// Timestamps from `--timestamps`.
    pub timestamps: bool,
    /// Verbose from `--verbose`.
    pub verbose: bool,
}

/// GlobalConfig is the process-wide runtime configuration, populated once
/// before any subcommand runs and immutable afterwards.
#[derive(Debug)]
pub struct GlobalConfig {
    /// Path is the resolved config file path, when one exists.
    pub path: Option<PathBuf>,
    /// Registry is the resolved registry URL.
    pub registry: Option<ResolvedField<String>>,
    /// Kubeconfig is the resolved kubeconfig path.
    pub kubeconfig: Option<ResolvedField<String>>,
    /// Context is the resolved kubeconfig context.
    pub context: Option<ResolvedField<String>>,
    /// Namespace is the resolved default namespace.
    pub namespace: ResolvedField<String>,
    /// Provider is the chosen provider name.
    pub provider: Option<ResolvedField<String>>,
    /// Output is the resolved output format, `yaml` or `json`.
    pub output: ResolvedField<String>,
    /// Timestamps enables log timestamps.
    pub timestamps: bool,
    /// Warnings enables surfacing Kubernetes API warnings.
    pub warnings: bool,
    /// Verbose switches reporting to structured JSON records.
    pub verbose: bool,
    /// Providers maps provider names to their opaque evaluator values.
    pub providers: BTreeMap<String, Value>,
    /// Cue is the evaluator host handle.
    pub cue: Context,
}

impl GlobalConfig {
    /// Load runs the two-phase bootstrap and resolves every field.
    #[instrument(skip_all)]
    pub fn load(flags: &Flags) -> Result<GlobalConfig> {
        let path = resolve_config_path(flags)?;
        debug!(path = ?path, "resolved config path");

        // Phase one: raw-text scan, no evaluator.
        let raw = match &path {
            Some(p) if p.exists() => Some(fs::read_to_string(p)?),
            _ => None,
        };
        let scanned = raw.as_deref().and_then(scan_registry);
        let registry = resolve_registry(flags, scanned.clone());
        if let Some(raw) = raw.as_deref() {
            if PROVIDERS_LINE.is_match(raw) && registry.is_none() {
                return Err(Error::Config(
                    "config declares providers but no registry is resolvable \
                     from --registry, OPM_REGISTRY, or the config file"
                        .to_string(),
                ));
            }
        }

        // Phase two: full evaluation against the embedded schema.
        let cue = Context::new();
        let mut file_config = FileConfig::default();
        let mut providers = BTreeMap::new();
        if let Some(raw) = raw.as_deref() {
            let loaded = load_full(&cue, raw, registry.as_ref().map(|r| r.value.as_str()))?;
            file_config = loaded.0;
            providers = loaded.1;
        }

        let namespace = ResolvedField::resolve(
            flags.namespace.clone(),
            env_var(ENV_NAMESPACE),
            file_config.namespace,
            "default".to_string(),
        );
        let output = ResolvedField::resolve(
            flags.output.clone(),
            None,
            None,
            "yaml".to_string(),
        );
        let kubeconfig = resolve_optional(
            flags.kubeconfig.clone(),
            env_var(ENV_KUBECONFIG),
            file_config.kubeconfig,
        );
        let context = resolve_optional(
            flags.context.clone(),
            env_var(ENV_CONTEXT),
            file_config.context,
        );
        let provider = resolve_provider(flags, &providers);
        trace!(
            namespace = %namespace.value,
            provider = provider.as_ref().map(|p| p.value.as_str()),
            "resolved fields"
        );

        Ok(GlobalConfig {
            path,
            registry,
            kubeconfig,
            context,
            namespace,
            provider,
            output,
            timestamps: flags.timestamps || file_config.timestamps.unwrap_or(false),
            warnings: file_config.warnings.unwrap_or(true),
            verbose: flags.verbose,
            providers,
            cue,
        })
    }

    /// Provider_value reports the chosen provider's evaluator value.
    pub fn provider_value(&self) -> Result<(&str, &Value)> {
        let chosen = self.provider.as_ref().ok_or_else(|| {
            Error::Config("no provider chosen; pass --provider or configure one".to_string())
        })?;
        let name = chosen.value.as_str();
        let value = self.providers.get(name).ok_or_else(|| {
            Error::Config(format!("provider {name:?} is not configured"))
        })?;
        Ok((name, value))
    }
}

// The plain fields read from the evaluated config file.
#[derive(Debug, Default)]
struct FileConfig {
    kubeconfig: Option<String>,
    context: Option<String>,
    namespace: Option<String>,
    timestamps: Option<bool>,
    warnings: Option<bool>,
}

/// Resolve_config_path applies `--config` > `OPM_CONFIG` > the home
/// default. Only the two explicit sources may point at a missing file.
fn resolve_config_path(flags: &Flags) -> Result<Option<PathBuf>> {
    if let Some(p) = &flags.config {
        return Ok(Some(PathBuf::from(p)));
    }
    if let Some(p) = env_var(ENV_CONFIG) {
        return Ok(Some(PathBuf::from(p)));
    }
    Ok(default_config_path())
}

/// Default_config_path reports `~/.opm/config.cue`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".opm").join("config.cue"))
}

/// Scan_registry extracts the first `registry: "<value>"` line from raw
/// config text.
fn scan_registry(raw: &str) -> Option<String> {
    REGISTRY_LINE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn resolve_registry(flags: &Flags, scanned: Option<String>) -> Option<ResolvedField<String>> {
    resolve_optional(flags.registry.clone(), env_var(ENV_REGISTRY), scanned)
}

// Like ResolvedField::resolve, but with no default: absent everywhere means
// absent.
fn resolve_optional(
    flag: Option<String>,
    env: Option<String>,
    config: Option<String>,
) -> Option<ResolvedField<String>> {
    let mut candidates = Vec::new();
    if let Some(v) = flag {
        candidates.push((Source::Flag, v));
    }
    if let Some(v) = env {
        candidates.push((Source::Env, v));
    }
    if let Some(v) = config {
        candidates.push((Source::Config, v));
    }
    let mut it = candidates.into_iter();
    let (source, value) = it.next()?;
    let mut out = ResolvedField::new(value, source);
    out.shadowed = it.map(|(s, v)| (s, v)).collect();
    Some(out)
}

fn resolve_provider(
    flags: &Flags,
    providers: &BTreeMap<String, Value>,
) -> Option<ResolvedField<String>> {
    if let Some(v) = &flags.provider {
        return Some(ResolvedField::new(v.clone(), Source::Flag));
    }
    // A single configured provider is chosen automatically.
    if providers.len() == 1 {
        let name = providers.keys().next().cloned()?;
        return Some(ResolvedField::new(name, Source::ConfigAuto));
    }
    None
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

// Full load: evaluate the config, validate it against the embedded schema,
// and extract the Kubernetes fields, log fields, and providers.
fn load_full(
    cue: &Context,
    raw: &str,
    registry: Option<&str>,
) -> Result<(FileConfig, BTreeMap<String, Value>)> {
    if let Some(registry) = registry {
        // The evaluator resolves module imports through its registry
        // environment variable.
        let _guard = RegistryEnv::set(registry);
        load_full_inner(cue, raw)
    } else {
        load_full_inner(cue, raw)
    }
}

fn load_full_inner(cue: &Context, raw: &str) -> Result<(FileConfig, BTreeMap<String, Value>)> {
    let config = cue
        .compile("config.cue", raw)
        .map_err(|err| Error::Config(err.to_string()))?;
    validate(cue, &config)?;

    let string = |path: &str| -> Option<String> {
        config.lookup_path(path).ok().and_then(|v| v.as_string().ok())
    };
    let boolean = |path: &str| -> Option<bool> {
        config.lookup_path(path).ok().and_then(|v| v.as_bool().ok())
    };
    let file_config = FileConfig {
        kubeconfig: string("kubernetes.kubeconfig"),
        context: string("kubernetes.context"),
        namespace: string("kubernetes.namespace"),
        timestamps: boolean("log.timestamps"),
        warnings: boolean("log.warnings"),
    };

    let mut providers = BTreeMap::new();
    if let Ok(block) = config.lookup_path("providers") {
        for (sel, value) in block.fields(FieldIter::default())? {
            providers.insert(sel.name(), value);
        }
    }
    Ok((file_config, providers))
}

/// Validate checks a config value against the embedded schema.
pub fn validate(cue: &Context, config: &Value) -> Result<()> {
    let schema = cue
        .compile("schema.cue", CONFIG_SCHEMA)
        .map_err(|err| Error::Config(format!("embedded schema: {err}")))?
        .lookup_path("#Config")
        .map_err(|err| Error::Config(format!("embedded schema: {err}")))?;
    let merged = schema.unify(config);
    merged
        .validate_concrete()
        .map_err(|err| Error::Config(format!("config does not satisfy schema: {err}")))
}

/// Vet loads and validates the config file, reporting the resolved path.
pub fn vet(flags: &Flags) -> Result<PathBuf> {
    let path = resolve_config_path(flags)?
        .ok_or_else(|| Error::Config("no config path resolvable".to_string()))?;
    if !path.exists() {
        return Err(Error::Config(format!("{} does not exist", path.display())));
    }
    let raw = fs::read_to_string(&path)?;
    let cue = Context::new();
    let config = cue
        .compile(&path.display().to_string(), &raw)
        .map_err(|err| Error::Config(err.to_string()))?;
    validate(&cue, &config)?;
    Ok(path)
}

/// Init writes the default config file, refusing to overwrite without
/// `force`.
pub fn init(flags: &Flags, force: bool) -> Result<PathBuf> {
    let path = resolve_config_path(flags)?
        .ok_or_else(|| Error::Config("no config path resolvable".to_string()))?;
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists; use --force to overwrite",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, DEFAULT_CONFIG)?;
    Ok(path)
}

// Scoped write of the evaluator's registry pointer.
struct RegistryEnv {
    prev: Option<std::ffi::OsString>,
}

impl RegistryEnv {
    fn set(registry: &str) -> RegistryEnv {
        let prev = env::var_os(opm_cue::REGISTRY_ENV);
        // The pipeline is single-threaded by contract; no other thread
        // observes this write.
        unsafe { env::set_var(opm_cue::REGISTRY_ENV, registry) };
        RegistryEnv { prev }
    }
}

impl Drop for RegistryEnv {
    fn drop(&mut self) {
        match self.prev.take() {
            Some(v) => unsafe { env::set_var(opm_cue::REGISTRY_ENV, v) },
            None => unsafe { env::remove_var(opm_cue::REGISTRY_ENV) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_scan_takes_first_line() {
        let raw = "\n// comment\nregistry: \"a.example/mods\"\nother: 1\nregistry: \"b.example\"\n";
        assert_eq!(scan_registry(raw), Some("a.example/mods".to_string()));
        assert_eq!(scan_registry("providers: {}\n"), None);
    }

    #[test]
    fn registry_precedence_records_shadows() {
        let flags = Flags {
            registry: Some("flag.example".into()),
            ..Default::default()
        };
        let got = resolve_registry(&flags, Some("file.example".to_string())).unwrap();
        assert_eq!(got.value, "flag.example");
        assert_eq!(got.source, Source::Flag);
        assert_eq!(
            got.shadowed,
            vec![(Source::Config, "file.example".to_string())],
        );
    }

    #[test]
    fn providers_without_registry_fail_before_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.cue");
        // Deliberately unparsable providers body: the failure must happen
        // before any evaluator call.
        fs::write(&path, "providers: { kubernetes: !!! }\n").unwrap();
        let flags = Flags {
            config: Some(path.display().to_string()),
            ..Default::default()
        };
        match GlobalConfig::load(&flags) {
            Err(Error::Config(msg)) => assert!(msg.contains("registry"), "{msg}"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn absent_config_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let flags = Flags {
            config: Some(dir.path().join("missing.cue").display().to_string()),
            ..Default::default()
        };
        let cfg = GlobalConfig::load(&flags).unwrap();
        assert_eq!(cfg.namespace.value, "default");
        assert_eq!(cfg.namespace.source, Source::Default);
        assert_eq!(cfg.output.value, "yaml");
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn single_provider_elected_automatically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.cue");
        fs::write(
            &path,
            "registry: \"r.example/mods\"\n\
             providers: kubernetes: {\n\
             \ttransformers: {}\n\
             }\n",
        )
        .unwrap();
        let flags = Flags {
            config: Some(path.display().to_string()),
            ..Default::default()
        };
        let cfg = GlobalConfig::load(&flags).unwrap();
        let provider = cfg.provider.unwrap();
        assert_eq!(provider.value, "kubernetes");
        assert_eq!(provider.source, Source::ConfigAuto);
    }

    #[test]
    fn schema_rejects_wrongly_typed_fields() {
        let cue = Context::new();
        let bad = cue
            .compile("config.cue", "kubernetes: namespace: 42\n")
            .unwrap();
        assert!(validate(&cue, &bad).is_err());

        let good = cue
            .compile("config.cue", "kubernetes: namespace: \"prod\"\n")
            .unwrap();
        validate(&cue, &good).unwrap();
    }

    #[test]
    fn kubernetes_fields_resolve_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.cue");
        fs::write(
            &path,
            "kubernetes: {\n\tnamespace: \"prod\"\n\tcontext: \"kind-ci\"\n}\n",
        )
        .unwrap();
        let flags = Flags {
            config: Some(path.display().to_string()),
            ..Default::default()
        };
        let cfg = GlobalConfig::load(&flags).unwrap();
        assert_eq!(cfg.namespace.value, "prod");
        assert_eq!(cfg.namespace.source, Source::Config);
        assert_eq!(cfg.context.unwrap().value, "kind-ci");
    }

    #[test]
    fn flag_namespace_shadows_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.cue");
        fs::write(&path, "kubernetes: namespace: \"prod\"\n").unwrap();
        let flags = Flags {
            config: Some(path.display().to_string()),
            namespace: Some("staging".into()),
            ..Default::default()
        };
        let cfg = GlobalConfig::load(&flags).unwrap();
        assert_eq!(cfg.namespace.value, "staging");
        assert_eq!(cfg.namespace.source, Source::Flag);
        assert!(
            cfg.namespace
                .shadowed
                .contains(&(Source::Config, "prod".to_string())),
        );
    }

    #[test]
    fn init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.cue");
        let flags = Flags {
            config: Some(path.display().to_string()),
            ..Default::default()
        };
        init(&flags, false).unwrap();
        assert!(init(&flags, false).is_err());
        init(&flags, true).unwrap();
        vet(&flags).unwrap();
    }
}
