//! Module `path` holds the selector and path types used to address into
//! values.

use std::fmt::{self, Display, Formatter};

/// Selector is one step of a [`Path`].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Selector {
    /// Field addresses a regular field.
    Field(String),
    /// Definition addresses a `#name` field.
    Definition(String),
    /// Hidden addresses a `_name` field.
    Hidden(String),
    /// Index addresses a list element.
    Index(usize),
}

impl Selector {
    /// Parse reads a single selector from its string form.
    pub fn parse(s: &str) -> Selector {
        if let Some(name) = s.strip_prefix('#') {
            Selector::Definition(name.to_string())
        } else if let Some(name) = s.strip_prefix('_') {
            Selector::Hidden(name.to_string())
        } else if let Ok(i) = s.parse::<usize>() {
            Selector::Index(i)
        } else {
            Selector::Field(s.to_string())
        }
    }

    /// Name reports the selector's name without its marker, or the index in
    /// decimal.
    pub fn name(&self) -> String {
        match self {
            Selector::Field(n) | Selector::Definition(n) | Selector::Hidden(n) => n.clone(),
            Selector::Index(i) => i.to_string(),
        }
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Field(n) => write!(f, "{n}"),
            Selector::Definition(n) => write!(f, "#{n}"),
            Selector::Hidden(n) => write!(f, "_{n}"),
            Selector::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Path addresses a position inside a value.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Path(pub Vec<Selector>);

impl Path {
    /// New builds a path from selectors.
    pub fn new<I: IntoIterator<Item = Selector>>(sels: I) -> Path {
        Path(sels.into_iter().collect())
    }

    /// Parse reads a dotted path, e.g. `metadata.name` or
    /// `#transform.#component`.
    pub fn parse(s: &str) -> Path {
        if s.is_empty() {
            return Path::default();
        }
        Path(s.split('.').map(Selector::parse).collect())
    }

    /// Selectors reports the path's steps.
    pub fn selectors(&self) -> &[Selector] {
        &self.0
    }

    /// Child reports this path extended by one selector.
    pub fn child(&self, sel: Selector) -> Path {
        let mut sels = self.0.clone();
        sels.push(sel);
        Path(sels)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, sel) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{sel}")?;
        }
        Ok(())
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Path {
        Path::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        let p = Path::parse("#transform.#component");
        assert_eq!(
            p.selectors(),
            [
                Selector::Definition("transform".into()),
                Selector::Definition("component".into()),
            ]
        );
        assert_eq!(p.to_string(), "#transform.#component");
    }

    #[test]
    fn mixed_selectors() {
        let p = Path::parse("metadata.labels");
        assert_eq!(
            p.selectors(),
            [
                Selector::Field("metadata".into()),
                Selector::Field("labels".into()),
            ]
        );
    }
}
