//! Module `provider` extracts transformer declarations from a configured
//! provider value.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{instrument, trace};

use opm_cue::{FieldIter, Value};

use crate::{Error, Result};

/// LoadedTransformer is one transformer of a provider.
#[derive(Clone, Debug)]
pub struct LoadedTransformer {
    /// Fqn is `<provider>#<name>`, unique in logs and diagnostics.
    pub fqn: String,
    /// Name is the bare transformer name.
    pub name: String,
    /// Required_labels maps label keys to their value constraints.
    pub required_labels: BTreeMap<String, Value>,
    /// Optional_labels maps optional label keys to their constraints.
    pub optional_labels: BTreeMap<String, Value>,
    /// Required_resources are resource FQNs the component must carry.
    pub required_resources: BTreeSet<String>,
    /// Optional_resources are resource FQNs the transformer understands.
    pub optional_resources: BTreeSet<String>,
    /// Required_traits are trait FQNs the component must carry.
    pub required_traits: BTreeSet<String>,
    /// Optional_traits are trait FQNs the transformer understands.
    pub optional_traits: BTreeSet<String>,
    /// Value is the transformer's whole evaluator value, holding the
    /// `#transform` expression for execution.
    pub value: Value,
}

impl LoadedTransformer {
    /// Handles reports whether the transformer requires or understands a
    /// trait FQN.
    pub fn handles_trait(&self, fqn: &str) -> bool {
        self.required_traits.contains(fqn) || self.optional_traits.contains(fqn)
    }
}

/// LoadedProvider is a named registry of transformers.
#[derive(Clone, Debug)]
pub struct LoadedProvider {
    /// Name is the provider name from the configuration.
    pub name: String,
    /// Version is the provider's declared version.
    pub version: Option<String>,
    /// Min_version is the oldest module contract the provider supports.
    pub min_version: Option<String>,
    /// Transformers lists the provider's transformers.
    pub transformers: Vec<LoadedTransformer>,
}

/// Load_provider extracts the transformer registry from a provider value.
#[instrument(skip(value))]
pub fn load_provider(name: &str, value: &Value) -> Result<LoadedProvider> {
    let transformers_value = value.lookup_path("transformers").map_err(|_| Error::Provider {
        provider: name.to_string(),
        reason: "missing transformers".to_string(),
    })?;
    let mut transformers = Vec::new();
    for (sel, tvalue) in transformers_value.fields(FieldIter::default())? {
        let tname = sel.name();
        let fqn = format!("{name}#{tname}");
        trace!(transformer = fqn, "loading transformer");
        transformers.push(LoadedTransformer {
            required_labels: label_constraints(&tvalue, "requiredLabels"),
            optional_labels: label_constraints(&tvalue, "optionalLabels"),
            required_resources: fqn_set(&tvalue, "requiredResources"),
            optional_resources: fqn_set(&tvalue, "optionalResources"),
            required_traits: fqn_set(&tvalue, "requiredTraits"),
            optional_traits: fqn_set(&tvalue, "optionalTraits"),
            name: tname,
            fqn,
            value: tvalue,
        });
    }
    Ok(LoadedProvider {
        name: name.to_string(),
        version: value.lookup_path("version").ok().and_then(|v| v.as_string().ok()),
        min_version: value
            .lookup_path("minVersion")
            .ok()
            .and_then(|v| v.as_string().ok()),
        transformers,
    })
}

fn label_constraints(value: &Value, field: &str) -> BTreeMap<String, Value> {
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

// FQN sets accept both shapes authors write: a list of FQN strings, or a
// struct keyed by FQN.
fn fqn_set(value: &Value, field: &str) -> BTreeSet<String> {
    let Ok(v) = value.lookup_path(field) else {
        return BTreeSet::new();
    };
    if let Ok(list) = v.decode::<Vec<String>>() {
        return list.into_iter().collect();
    }
    v.fields(FieldIter::default())
        .map(|fields| fields.into_iter().map(|(sel, _)| sel.name()).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opm_cue::Context;

    fn provider_value(ctx: &Context) -> Value {
        ctx.compile(
            "provider.cue",
            "version: \"0.1.0\"\n\
             minVersion: \"0.1.0\"\n\
             transformers: {\n\
             \tdeployment: {\n\
             \t\trequiredLabels: \"workload-type\": \"stateless\"\n\
             \t\trequiredResources: [\"opm.dev/core#Container\"]\n\
             \t\toptionalTraits: [\"opm.dev/core#Replicas\"]\n\
             \t\t#transform: output: kind: \"Deployment\"\n\
             \t}\n\
             \tservice: {\n\
             \t\trequiredTraits: [\"opm.dev/core#Expose\"]\n\
             \t\t#transform: output: kind: \"Service\"\n\
             \t}\n\
             }\n",
        )
        .unwrap()
    }

    #[test]
    fn extracts_transformers() {
        let ctx = Context::new();
        let p = load_provider("kubernetes", &provider_value(&ctx)).unwrap();
        assert_eq!(p.version.as_deref(), Some("0.1.0"));
        assert_eq!(p.transformers.len(), 2);

        let deploy = p
            .transformers
            .iter()
            .find(|t| t.name == "deployment")
            .unwrap();
        assert_eq!(deploy.fqn, "kubernetes#deployment");
        assert!(deploy.required_labels.contains_key("workload-type"));
        assert!(deploy.required_resources.contains("opm.dev/core#Container"));
        assert!(deploy.handles_trait("opm.dev/core#Replicas"));
        assert!(!deploy.handles_trait("opm.dev/core#Expose"));
    }

    #[test]
    fn missing_transformers_is_an_error() {
        let ctx = Context::new();
        let v = ctx.compile("p.cue", "version: \"1\"\n").unwrap();
        assert!(matches!(
            load_provider("kubernetes", &v),
            Err(Error::Provider { .. })
        ));
    }
}
