//! Module `value` holds the evaluator context and the value handles.
//!
//! A [`Value`] is a handle into an immutable composite tree: a
//! path-addressed merge of every source file, overlay, unification, and
//! fill that produced it. Expressions stay unevaluated inside the tree
//! until a value is observed (looked up, decoded, validated, or iterated),
//! so a fill at `#config` is seen by every expression that references
//! `#config`, no matter when the reference was written.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::DeserializeOwned;

use crate::ast::{Decl, Expr, File, Key, KeyKind};
use crate::eval::{Evaluator, Val, val_from_json};
use crate::path::{Path, Selector};
use crate::{Error, Result, parser};

/// BUILTIN_PACKAGES are the import paths the host resolves without a
/// registry.
pub(crate) static BUILTIN_PACKAGES: &[&str] = &["uuid", "strings"];

// One position in the composite tree. A node's value is the unification of
// its expression conjuncts and the struct formed by its children.
#[derive(Clone, Debug, Default)]
pub(crate) struct CNode {
    pub(crate) conjuncts: Vec<Conjunct>,
    pub(crate) children: Vec<(Key, Rc<CNode>)>,
    pub(crate) optional: bool,
}

impl CNode {
    pub(crate) fn child_by_sel(&self, sel: &Selector) -> Option<(&Key, &Rc<CNode>)> {
        self.children
            .iter()
            .find(|(k, _)| key_matches_sel(k, sel))
            .map(|(k, n)| (k, n))
    }
}

// One contribution to a node's value.
#[derive(Clone, Debug)]
pub(crate) enum Conjunct {
    // An expression, resolved lexically against the scope path (the path of
    // the struct the expression appeared in).
    Expr { expr: Rc<Expr>, scope: Path },
    // A snapshot of another tree's value, evaluated in its own tree.
    Ext(Value),
    // A pre-evaluated value (from `encode` or a collapsed unification).
    Val(Rc<Val>),
}

#[derive(Debug)]
pub(crate) struct Tree {
    pub(crate) root: CNode,
    // Import paths, keyed by local name.
    pub(crate) imports: BTreeMap<String, String>,
}

pub(crate) fn key_matches_sel(key: &Key, sel: &Selector) -> bool {
    match (sel, key.kind) {
        (Selector::Field(n), KeyKind::Regular) => n == &key.name,
        (Selector::Definition(n), KeyKind::Definition) => n == &key.name,
        (Selector::Hidden(n), KeyKind::Hidden) => n == &key.name,
        _ => false,
    }
}

pub(crate) fn key_to_sel(key: &Key) -> Selector {
    match key.kind {
        KeyKind::Regular => Selector::Field(key.name.clone()),
        KeyKind::Definition => Selector::Definition(key.name.clone()),
        KeyKind::Hidden => Selector::Hidden(key.name.clone()),
    }
}

fn sel_to_key(sel: &Selector) -> Key {
    match sel {
        Selector::Field(n) => Key::regular(n.clone()),
        Selector::Definition(n) => Key::definition(n.clone()),
        Selector::Hidden(n) => Key::hidden(n.clone()),
        Selector::Index(i) => Key::regular(i.to_string()),
    }
}

/// Context is the evaluator context. Values from one context may be unified
/// and filled into each other freely; the context itself holds no state and
/// exists to scope the single-ownership contract.
#[derive(Debug, Default)]
pub struct Context {
    // Handles are shared with Rc, which keeps every value !Send; the
    // evaluator is not safe for concurrent use.
    _single_owner: PhantomData<Rc<()>>,
}

impl Context {
    /// New creates a context.
    pub fn new() -> Context {
        Context::default()
    }

    /// Compile parses and builds one source file.
    pub fn compile(&self, filename: &str, src: &str) -> Result<Value> {
        let file = parser::parse_file(filename, src)?;
        self.build_files(vec![file])
    }

    /// Compile_expr parses and builds a single expression.
    pub fn compile_expr(&self, src: &str) -> Result<Value> {
        let expr = parser::parse_expr(src)?;
        let mut root = CNode::default();
        root.conjuncts.push(Conjunct::Expr {
            expr: Rc::new(expr),
            scope: Path::default(),
        });
        Ok(Value::from_tree(Tree {
            root,
            imports: BTreeMap::new(),
        }))
    }

    /// Build_file builds a value from one syntax tree.
    pub fn build_file(&self, file: File) -> Result<Value> {
        self.build_files(vec![file])
    }

    /// Build_files builds a single value from several files of one package,
    /// unified together.
    pub fn build_files(&self, files: Vec<File>) -> Result<Value> {
        let mut root = CNode::default();
        let mut imports = BTreeMap::new();
        for file in files {
            for path in &file.imports {
                let local = path.rsplit('/').next().unwrap_or(path).to_string();
                if !BUILTIN_PACKAGES.contains(&local.as_str()) {
                    return Err(Error::Import(path.clone()));
                }
                imports.insert(local, path.clone());
            }
            for decl in file.decls {
                add_decl(&mut root, &Path::default(), decl);
            }
        }
        Ok(Value::from_tree(Tree { root, imports }))
    }

    /// Encode builds a concrete value from a JSON tree.
    pub fn encode(&self, v: &serde_json::Value) -> Value {
        let mut root = CNode::default();
        root.conjuncts.push(Conjunct::Val(Rc::new(val_from_json(v))));
        Value::from_tree(Tree {
            root,
            imports: BTreeMap::new(),
        })
    }
}

fn add_decl(node: &mut CNode, scope: &Path, decl: Decl) {
    let Decl::Field {
        key,
        optional,
        value,
    } = decl;
    let child_path = scope.child(key_to_sel(&key));
    let entry = match node.children.iter().position(|(k, _)| k == &key) {
        Some(i) => &mut node.children[i],
        None => {
            node.children.push((key, Rc::new(CNode::default())));
            let last = node.children.len() - 1;
            &mut node.children[last]
        }
    };
    let child = Rc::make_mut(&mut entry.1);
    if optional {
        child.optional = true;
    }
    add_expr(child, &child_path, value);
}

fn add_expr(node: &mut CNode, path: &Path, expr: Expr) {
    match expr {
        // Struct literals decompose into composite children so fills and
        // references can address inside them. An empty literal still has to
        // contribute a struct, or the field would read as top.
        Expr::Struct(decls) if decls.is_empty() => {
            node.conjuncts
                .push(Conjunct::Val(Rc::new(Val::Struct(Vec::new()))));
        }
        Expr::Struct(decls) => {
            for decl in decls {
                add_decl(node, path, decl);
            }
        }
        expr => node.conjuncts.push(Conjunct::Expr {
            expr: Rc::new(expr),
            scope: path.clone(),
        }),
    }
}

pub(crate) fn node_at<'t>(root: &'t CNode, path: &Path) -> Option<&'t CNode> {
    let mut cur = root;
    for sel in path.selectors() {
        cur = cur.child_by_sel(sel).map(|(_, n)| n)?;
    }
    Some(cur)
}

/// FieldIter controls which fields [`Value::fields`] reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldIter {
    /// Definitions includes `#name` fields.
    pub definitions: bool,
    /// Hidden includes `_name` fields.
    pub hidden: bool,
    /// Optional includes `name?:` fields.
    pub optional: bool,
}

/// Value is an immutable handle into an evaluation tree.
#[derive(Clone, Debug)]
pub struct Value {
    pub(crate) tree: Rc<Tree>,
    pub(crate) path: Path,
}

impl Value {
    fn from_tree(tree: Tree) -> Value {
        Value {
            tree: Rc::new(tree),
            path: Path::default(),
        }
    }

    fn literal(val: Val) -> Value {
        let mut root = CNode::default();
        root.conjuncts.push(Conjunct::Val(Rc::new(val)));
        Value::from_tree(Tree {
            root,
            imports: BTreeMap::new(),
        })
    }

    fn eval(&self) -> Val {
        Evaluator::new(&self.tree).eval_at(&self.path)
    }

    /// Lookup_path reads the value at a path relative to this one,
    /// reporting [`Error::NotFound`] if nothing exists there.
    pub fn lookup_path<P: Into<Path>>(&self, path: P) -> Result<Value> {
        let path: Path = path.into();
        let mut cur = self.path.clone();
        let mut sels = path.selectors().iter();
        while let Some(sel) = sels.next() {
            let node = node_at(&self.tree.root, &cur);
            match node.and_then(|n| n.child_by_sel(sel)) {
                Some(_) => cur = cur.child(sel.clone()),
                None => {
                    // Fall back to evaluation: the field may be contributed
                    // by a conjunct rather than declared in the composite
                    // tree.
                    let here = Value {
                        tree: Rc::clone(&self.tree),
                        path: cur,
                    };
                    let mut val = here.eval();
                    let mut rest = vec![sel.clone()];
                    rest.extend(sels.cloned());
                    for sel in &rest {
                        val = match val.select(sel) {
                            Some(v) => v,
                            None => return Err(Error::NotFound(path.to_string())),
                        };
                    }
                    return Ok(Value::literal(val));
                }
            }
        }
        Ok(Value {
            tree: Rc::clone(&self.tree),
            path: cur,
        })
    }

    /// Fill_path writes a value at a path, producing a new value without
    /// mutating the input. Writes into definition fields succeed even when
    /// the corresponding read is not permitted.
    pub fn fill_path<P: Into<Path>>(&self, path: P, v: &Value) -> Value {
        let path: Path = path.into();
        let full: Vec<Selector> = self
            .path
            .selectors()
            .iter()
            .chain(path.selectors())
            .cloned()
            .collect();
        let root = fill(&self.tree.root, &full, Conjunct::Ext(v.clone()));
        Value {
            tree: Rc::new(Tree {
                root,
                imports: self.tree.imports.clone(),
            }),
            path: self.path.clone(),
        }
    }

    /// Unify combines two values by lattice intersection.
    ///
    /// Unifying two whole trees merges them structurally, so later fills
    /// and cross-references see one namespace; unifying inner values
    /// intersects their evaluated forms.
    pub fn unify(&self, other: &Value) -> Value {
        if self.path.selectors().is_empty() && other.path.selectors().is_empty() {
            let root = merge_nodes(&self.tree.root, &other.tree.root);
            let mut imports = self.tree.imports.clone();
            imports.extend(other.tree.imports.clone());
            return Value::from_tree(Tree { root, imports });
        }
        let val = Evaluator::unify_vals(self.eval(), other.eval());
        Value::literal(val)
    }

    /// Fields reports the struct fields of this value.
    ///
    /// Fields backed by the composite tree come back as handles into it, so
    /// later fills keep affecting them; fields contributed only by
    /// evaluation come back as snapshots.
    pub fn fields(&self, opts: FieldIter) -> Result<Vec<(Selector, Value)>> {
        let node = node_at(&self.tree.root, &self.path);
        match self.eval() {
            Val::Struct(fields) => Ok(fields
                .into_iter()
                .filter(|(key, fv)| {
                    (match key.kind {
                        KeyKind::Regular => true,
                        KeyKind::Definition => opts.definitions,
                        KeyKind::Hidden => opts.hidden,
                    }) && (opts.optional || !fv.optional)
                })
                .map(|(key, fv)| {
                    let sel = key_to_sel(&key);
                    let value = if node.is_some_and(|n| n.child_by_sel(&sel).is_some()) {
                        Value {
                            tree: Rc::clone(&self.tree),
                            path: self.path.child(sel.clone()),
                        }
                    } else {
                        Value::literal(fv.val)
                    };
                    (sel, value)
                })
                .collect()),
            Val::Bottom(msg) => Err(Error::Eval(msg)),
            v => Err(Error::Eval(format!(
                "cannot iterate fields of {}",
                v.kind_name()
            ))),
        }
    }

    /// Validate_concrete checks that no abstract values remain anywhere in
    /// the exported form, reporting the offending paths.
    pub fn validate_concrete(&self) -> Result<()> {
        let mut abstract_paths = Vec::new();
        self.eval().collect_abstract(&Path::default(), &mut abstract_paths);
        if abstract_paths.is_empty() {
            Ok(())
        } else {
            Err(Error::NotConcrete(abstract_paths))
        }
    }

    /// To_json exports the value as a JSON tree, resolving defaults and
    /// dropping definition, hidden, and optional fields.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.eval().export(&Path::default())
    }

    /// Decode exports the value into any deserializable Rust type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json()?)?)
    }

    /// Error reports the evaluation error of this value, if it is one.
    pub fn error(&self) -> Option<String> {
        match self.eval() {
            Val::Bottom(msg) => Some(msg),
            _ => None,
        }
    }

    /// As_string decodes a string value.
    pub fn as_string(&self) -> Result<String> {
        self.decode()
    }

    /// As_int decodes an integer value.
    pub fn as_int(&self) -> Result<i64> {
        self.decode()
    }

    /// As_bool decodes a boolean value.
    pub fn as_bool(&self) -> Result<bool> {
        self.decode()
    }
}

fn fill(node: &CNode, sels: &[Selector], conjunct: Conjunct) -> CNode {
    let mut out = node.clone();
    match sels.split_first() {
        None => out.conjuncts.push(conjunct),
        Some((sel, rest)) => {
            let key = sel_to_key(sel);
            match out.children.iter().position(|(k, _)| k == &key) {
                Some(i) => {
                    let next = fill(&out.children[i].1, rest, conjunct);
                    out.children[i].1 = Rc::new(next);
                }
                None => {
                    let next = fill(&CNode::default(), rest, conjunct);
                    out.children.push((key, Rc::new(next)));
                }
            }
        }
    }
    out
}

fn merge_nodes(a: &CNode, b: &CNode) -> CNode {
    let mut out = a.clone();
    out.conjuncts.extend(b.conjuncts.iter().cloned());
    out.optional = a.optional && b.optional;
    for (key, bnode) in &b.children {
        match out.children.iter().position(|(k, _)| k == key) {
            Some(i) => {
                let merged = merge_nodes(&out.children[i].1, bnode);
                out.children[i].1 = Rc::new(merged);
            }
            None => out.children.push((key.clone(), Rc::clone(bnode))),
        }
    }
    out
}
