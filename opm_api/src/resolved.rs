//! Module `resolved` holds the precedence-resolved configuration field type.

use std::fmt::Display;

/// Source tags where a resolved field's value came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Source {
    /// A command-line flag.
    Flag,
    /// An environment variable.
    Env,
    /// The configuration file.
    Config,
    /// The built-in default.
    Default,
    /// Elected automatically because the config declares exactly one choice.
    ConfigAuto,
}

/// ResolvedField is a value plus the source that won the precedence contest
/// and the values it shadowed.
#[derive(Clone, Debug)]
pub struct ResolvedField<T> {
    /// Value is the winning value.
    pub value: T,
    /// Source tags where the value came from.
    pub source: Source,
    /// Shadowed lists the lower-precedence values the winner displaced.
    pub shadowed: Vec<(Source, String)>,
}

impl<T> ResolvedField<T> {
    /// New wraps a value with its source and no shadows.
    pub fn new(value: T, source: Source) -> ResolvedField<T> {
        ResolvedField {
            value,
            source,
            shadowed: Vec::new(),
        }
    }
}

impl<T: Display> ResolvedField<T> {
    /// Resolve applies the standard precedence `Flag > Env > Config >
    /// Default`, recording a shadow for every lower-precedence source that
    /// also carried a value.
    pub fn resolve(
        flag: Option<T>,
        env: Option<T>,
        config: Option<T>,
        default: T,
    ) -> ResolvedField<T> {
        let mut candidates = vec![];
        if let Some(v) = flag {
            candidates.push((Source::Flag, v));
        }
        if let Some(v) = env {
            candidates.push((Source::Env, v));
        }
        if let Some(v) = config {
            candidates.push((Source::Config, v));
        }
        candidates.push((Source::Default, default));

        let mut it = candidates.into_iter();
        let (source, value) = it.next().expect("default is always present");
        ResolvedField {
            value,
            source,
            shadowed: it.map(|(s, v)| (s, v.to_string())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins() {
        let f = ResolvedField::resolve(
            Some("from-flag"),
            Some("from-env"),
            Some("from-config"),
            "fallback",
        );
        assert_eq!(f.value, "from-flag");
        assert_eq!(f.source, Source::Flag);
        assert_eq!(
            f.shadowed,
            vec![
                (Source::Env, "from-env".to_string()),
                (Source::Config, "from-config".to_string()),
                (Source::Default, "fallback".to_string()),
            ]
        );
    }

    #[test]
    fn default_when_nothing_set() {
        let f = ResolvedField::resolve(None, None, None, "fallback");
        assert_eq!(f.value, "fallback");
        assert_eq!(f.source, Source::Default);
        assert!(f.shadowed.is_empty());
    }

    #[test]
    fn source_renders_kebab_case() {
        assert_eq!(Source::ConfigAuto.to_string(), "config-auto");
        assert_eq!(Source::Flag.to_string(), "flag");
    }
}
