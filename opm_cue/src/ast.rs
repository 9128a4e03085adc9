//! Module `ast` holds the typed syntax tree and its programmatic builders.
//!
//! Generated sources (such as release overlays) are composed as trees via
//! the builder functions rather than by string concatenation, so injected
//! strings can never change the shape of the surrounding program.

/// File is one source file: an optional package clause, imports, and
/// declarations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct File {
    /// Filename is used in diagnostics.
    pub filename: String,
    /// Package is the package clause, when present.
    pub package: Option<String>,
    /// Imports lists imported package paths.
    pub imports: Vec<String>,
    /// Decls are the top-level declarations.
    pub decls: Vec<Decl>,
}

/// KeyKind discriminates field visibility.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KeyKind {
    /// Regular fields are exported.
    Regular,
    /// Definition fields (`#name`) are schema; they do not export.
    Definition,
    /// Hidden fields (`_name`) are internal; they do not export.
    Hidden,
}

/// Key is a field label.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key {
    /// Kind is the field visibility.
    pub kind: KeyKind,
    /// Name is the label without its visibility marker.
    pub name: String,
}

impl Key {
    /// Regular builds an exported field label.
    pub fn regular<S: Into<String>>(name: S) -> Key {
        Key {
            kind: KeyKind::Regular,
            name: name.into(),
        }
    }

    /// Definition builds a `#name` label.
    pub fn definition<S: Into<String>>(name: S) -> Key {
        Key {
            kind: KeyKind::Definition,
            name: name.into(),
        }
    }

    /// Hidden builds a `_name` label.
    pub fn hidden<S: Into<String>>(name: S) -> Key {
        Key {
            kind: KeyKind::Hidden,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            KeyKind::Regular => write!(f, "{}", self.name),
            KeyKind::Definition => write!(f, "#{}", self.name),
            KeyKind::Hidden => write!(f, "_{}", self.name),
        }
    }
}

/// Decl is one declaration in a file or struct literal.
#[derive(Clone, Debug, PartialEq)]
pub enum Decl {
    /// Field binds a key to an expression.
    Field {
        /// Key is the field label.
        key: Key,
        /// Optional marks `key?:` fields, which constrain without
        /// requiring.
        optional: bool,
        /// Value is the field expression.
        value: Expr,
    },
}

/// TypeKind is an abstract type atom.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TypeKind {
    /// `string`
    String,
    /// `int`
    Int,
    /// `float`
    Float,
    /// `number` admits both int and float.
    Number,
    /// `bool`
    Bool,
    /// `bytes`
    Bytes,
    /// `_`, the top value.
    Top,
}

/// BinOp is a binary operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinOp {
    /// `&`, unification.
    And,
    /// `|`, disjunction.
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
}

/// CmpOp is a comparison used as a unary constraint, e.g. `>=1`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CmpOp {
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `!=`
    Ne,
}

/// StrPart is one segment of a possibly-interpolated string literal.
#[derive(Clone, Debug, PartialEq)]
pub enum StrPart {
    /// Lit is literal text.
    Lit(String),
    /// Interp is a `\(expr)` interpolation.
    Interp(Expr),
}

/// Expr is an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// `null`
    Null,
    /// A boolean literal.
    Bool(bool),
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// A string literal with interpolation parts.
    String(Vec<StrPart>),
    /// A reference, resolved lexically. The name retains its `#`/`_`
    /// marker.
    Ident(String),
    /// Field selection, `expr.name` (the name may carry a `#` marker).
    Selector(Box<Expr>, String),
    /// Index selection, `expr["name"]` or `expr[0]`.
    Index(Box<Expr>, Box<Expr>),
    /// A call, `fn(args...)`.
    Call(Box<Expr>, Vec<Expr>),
    /// A struct literal.
    Struct(Vec<Decl>),
    /// A list literal.
    List(Vec<Expr>),
    /// A type atom.
    Type(TypeKind),
    /// A binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// A comparison constraint, e.g. `>=1`.
    Constraint(CmpOp, Box<Expr>),
    /// A `*expr` disjunction default marker.
    Default(Box<Expr>),
}

// Builders, used wherever sources are generated rather than parsed.

/// Str builds a plain string literal.
pub fn str<S: Into<String>>(s: S) -> Expr {
    Expr::String(vec![StrPart::Lit(s.into())])
}

/// Interp builds an interpolated string from parts.
pub fn interp<I: IntoIterator<Item = StrPart>>(parts: I) -> Expr {
    Expr::String(parts.into_iter().collect())
}

/// Ident builds a reference.
pub fn ident<S: Into<String>>(name: S) -> Expr {
    Expr::Ident(name.into())
}

/// Sel builds a selector chain from a base and field names.
pub fn sel<S: AsRef<str>>(base: Expr, names: &[S]) -> Expr {
    names.iter().fold(base, |e, n| {
        Expr::Selector(Box::new(e), n.as_ref().to_string())
    })
}

/// Call builds a call expression.
pub fn call<I: IntoIterator<Item = Expr>>(callee: Expr, args: I) -> Expr {
    Expr::Call(Box::new(callee), args.into_iter().collect())
}

/// Field builds a required field declaration.
pub fn field(key: Key, value: Expr) -> Decl {
    Decl::Field {
        key,
        optional: false,
        value,
    }
}

/// Strukt builds a struct literal.
pub fn strukt<I: IntoIterator<Item = Decl>>(decls: I) -> Expr {
    Expr::Struct(decls.into_iter().collect())
}

/// Binary builds a binary operation.
pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

/// Default builds a `*expr` disjunction default.
pub fn default(e: Expr) -> Expr {
    Expr::Default(Box::new(e))
}
