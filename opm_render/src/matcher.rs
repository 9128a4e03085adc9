//! Module `matcher` pairs components with transformers.
//!
//! Matching is purely structural set logic; nothing is executed here. A
//! component matches a transformer iff every required label unifies, every
//! required resource FQN is present, and every required trait FQN is
//! present.

use serde_json::json;
use tracing::{instrument, trace};

use opm_cue::Context;

use crate::provider::{LoadedProvider, LoadedTransformer};
use crate::release::{BuiltRelease, LoadedComponent};

/// Match is one (component, transformer) pairing.
#[derive(Clone, Debug)]
pub struct Match<'r> {
    /// Component is the matched component.
    pub component: &'r LoadedComponent,
    /// Transformer is the matched transformer.
    pub transformer: &'r LoadedTransformer,
    /// Unhandled_traits are component traits this transformer neither
    /// requires nor understands.
    pub unhandled_traits: Vec<String>,
}

/// MatchSet is the outcome of matching a whole release against a provider.
#[derive(Debug, Default)]
pub struct MatchSet<'r> {
    /// Matches are the pairings, in component order.
    pub matches: Vec<Match<'r>>,
    /// Unmatched are components that matched zero transformers; each is a
    /// render error.
    pub unmatched: Vec<&'r LoadedComponent>,
}

impl MatchSet<'_> {
    /// Unhandled_traits reports, per component, the traits no matching
    /// transformer handles. A trait is only unhandled when every matching
    /// transformer considers it unhandled.
    pub fn unhandled_traits(&self) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        let mut seen = Vec::new();
        for m in &self.matches {
            if seen.contains(&m.component.name) {
                continue;
            }
            seen.push(m.component.name.clone());
            let unhandled: Vec<String> = m
                .component
                .traits
                .keys()
                .filter(|fqn| {
                    self.matches
                        .iter()
                        .filter(|other| other.component.name == m.component.name)
                        .all(|other| other.unhandled_traits.contains(fqn))
                })
                .cloned()
                .collect();
            if !unhandled.is_empty() {
                out.push((m.component.name.clone(), unhandled));
            }
        }
        out
    }
}

/// Match_components pairs every component of a release with the provider's
/// transformers.
#[instrument(skip_all, fields(provider = provider.name))]
pub fn match_components<'r>(
    release: &'r BuiltRelease,
    provider: &'r LoadedProvider,
) -> MatchSet<'r> {
    let ctx = Context::new();
    let mut out = MatchSet::default();
    for component in &release.components {
        let mut any = false;
        for transformer in &provider.transformers {
            if !matches(&ctx, component, transformer) {
                continue;
            }
            any = true;
            let unhandled_traits: Vec<String> = component
                .traits
                .keys()
                .filter(|fqn| !transformer.handles_trait(fqn))
                .cloned()
                .collect();
            trace!(
                component = component.name,
                transformer = transformer.fqn,
                unhandled = unhandled_traits.len(),
                "matched"
            );
            out.matches.push(Match {
                component,
                transformer,
                unhandled_traits,
            });
        }
        if !any {
            out.unmatched.push(component);
        }
    }
    out
}

fn matches(ctx: &Context, component: &LoadedComponent, transformer: &LoadedTransformer) -> bool {
    for (key, constraint) in &transformer.required_labels {
        let Some(value) = component.labels.get(key) else {
            return false;
        };
        let label = ctx.encode(&json!(value));
        if constraint.unify(&label).error().is_some() {
            return false;
        }
    }
    transformer
        .required_resources
        .iter()
        .all(|fqn| component.resources.contains_key(fqn))
        && transformer
            .required_traits
            .iter()
            .all(|fqn| component.traits.contains_key(fqn))
}
