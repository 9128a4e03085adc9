//! Module `eval` holds the evaluator: conjunct evaluation, lattice
//! unification, default resolution, export, and the builtin packages.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::{Map, Number, json};
use uuid::Uuid;

use crate::ast::{BinOp, CmpOp, Decl, Expr, Key, KeyKind, StrPart, TypeKind};
use crate::path::{Path, Selector};
use crate::value::{Conjunct, Tree, key_matches_sel, node_at};
use crate::{Error, Result};

const MAX_DEPTH: usize = 512;

/// FieldVal is one field of an evaluated struct.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct FieldVal {
    pub(crate) val: Val,
    pub(crate) optional: bool,
}

/// Val is a fully evaluated value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Type(TypeKind),
    // An abstract value constrained by a type and/or comparison predicates.
    Pred {
        ty: Option<TypeKind>,
        preds: Vec<(CmpOp, Box<Val>)>,
    },
    Struct(Vec<(Key, FieldVal)>),
    List(Vec<Val>),
    Disj {
        branches: Vec<Val>,
        default: Option<Box<Val>>,
    },
    Pkg(String),
    Func(String),
    Bottom(String),
}

impl Val {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "string",
            Val::Type(_) => "type",
            Val::Pred { .. } => "constraint",
            Val::Struct(_) => "struct",
            Val::List(_) => "list",
            Val::Disj { .. } => "disjunction",
            Val::Pkg(_) => "package",
            Val::Func(_) => "function",
            Val::Bottom(_) => "error",
        }
    }

    // Collapses a disjunction to its default (or sole remaining branch).
    pub(crate) fn resolve_default(self) -> Val {
        match self {
            Val::Disj { default: Some(d), .. } => d.resolve_default(),
            Val::Disj { mut branches, .. } if branches.len() == 1 => {
                branches.remove(0).resolve_default()
            }
            v => v,
        }
    }

    // Selects a child value, resolving defaults first.
    pub(crate) fn select(self, sel: &Selector) -> Option<Val> {
        match self.resolve_default() {
            Val::Struct(fields) => fields
                .into_iter()
                .find(|(k, _)| key_matches_sel(k, sel))
                .map(|(_, fv)| fv.val),
            Val::List(items) => match sel {
                Selector::Index(i) => items.into_iter().nth(*i),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn collect_abstract(&self, path: &Path, out: &mut Vec<String>) {
        match self {
            Val::Null | Val::Bool(_) | Val::Int(_) | Val::Float(_) | Val::Str(_) => {}
            Val::Struct(fields) => {
                for (key, fv) in fields {
                    if key.kind != KeyKind::Regular || fv.optional {
                        continue;
                    }
                    fv.val
                        .collect_abstract(&path.child(Selector::Field(key.name.clone())), out);
                }
            }
            Val::List(items) => {
                for (i, v) in items.iter().enumerate() {
                    v.collect_abstract(&path.child(Selector::Index(i)), out);
                }
            }
            Val::Disj { .. } => {
                let v = self.clone().resolve_default();
                if matches!(v, Val::Disj { .. }) {
                    out.push(path_str(path));
                } else {
                    v.collect_abstract(path, out);
                }
            }
            Val::Type(_) | Val::Pred { .. } | Val::Pkg(_) | Val::Func(_) => {
                out.push(path_str(path));
            }
            Val::Bottom(msg) => out.push(format!("{} ({msg})", path_str(path))),
        }
    }

    pub(crate) fn export(&self, path: &Path) -> Result<serde_json::Value> {
        match self {
            Val::Null => Ok(serde_json::Value::Null),
            Val::Bool(b) => Ok(json!(b)),
            Val::Int(v) => Ok(json!(v)),
            Val::Float(v) => match Number::from_f64(*v) {
                Some(n) => Ok(serde_json::Value::Number(n)),
                None => Err(Error::Eval(format!("{}: non-finite float", path_str(path)))),
            },
            Val::Str(s) => Ok(json!(s)),
            Val::Struct(fields) => {
                let mut out = Map::new();
                for (key, fv) in fields {
                    if key.kind != KeyKind::Regular || fv.optional {
                        continue;
                    }
                    let child = path.child(Selector::Field(key.name.clone()));
                    out.insert(key.name.clone(), fv.val.export(&child)?);
                }
                Ok(serde_json::Value::Object(out))
            }
            Val::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, v) in items.iter().enumerate() {
                    out.push(v.export(&path.child(Selector::Index(i)))?);
                }
                Ok(serde_json::Value::Array(out))
            }
            Val::Disj { .. } => {
                let v = self.clone().resolve_default();
                if matches!(v, Val::Disj { .. }) {
                    Err(Error::NotConcrete(vec![path_str(path)]))
                } else {
                    v.export(path)
                }
            }
            Val::Type(_) | Val::Pred { .. } | Val::Pkg(_) | Val::Func(_) => {
                Err(Error::NotConcrete(vec![path_str(path)]))
            }
            Val::Bottom(msg) => Err(Error::Eval(format!("{}: {msg}", path_str(path)))),
        }
    }
}

fn path_str(path: &Path) -> String {
    if path.selectors().is_empty() {
        "(root)".to_string()
    } else {
        path.to_string()
    }
}

/// Val_from_json builds a concrete value from a JSON tree.
pub(crate) fn val_from_json(v: &serde_json::Value) -> Val {
    match v {
        serde_json::Value::Null => Val::Null,
        serde_json::Value::Bool(b) => Val::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Val::Int(i)
            } else {
                Val::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Val::Str(s.clone()),
        serde_json::Value::Array(items) => Val::List(items.iter().map(val_from_json).collect()),
        serde_json::Value::Object(map) => Val::Struct(
            map.iter()
                .map(|(k, v)| {
                    (
                        Key::regular(k.clone()),
                        FieldVal {
                            val: val_from_json(v),
                            optional: false,
                        },
                    )
                })
                .collect(),
        ),
    }
}

/// Evaluator evaluates one tree. Results are memoized per observation; a
/// new evaluator sees any fills applied since.
pub(crate) struct Evaluator<'t> {
    tree: &'t Tree,
    memo: RefCell<HashMap<Path, Val>>,
    stack: RefCell<Vec<Path>>,
    depth: Cell<usize>,
}

// A struct-literal scope frame for lexical resolution inside expressions.
type Frame = Rc<Vec<Decl>>;

impl<'t> Evaluator<'t> {
    pub(crate) fn new(tree: &'t Tree) -> Evaluator<'t> {
        Evaluator {
            tree,
            memo: RefCell::new(HashMap::new()),
            stack: RefCell::new(Vec::new()),
            depth: Cell::new(0),
        }
    }

    pub(crate) fn eval_at(&self, path: &Path) -> Val {
        if let Some(v) = self.memo.borrow().get(path) {
            return v.clone();
        }
        if self.stack.borrow().contains(path) {
            return Val::Bottom(format!("structural cycle at {}", path_str(path)));
        }
        let Some(node) = node_at(&self.tree.root, path) else {
            return Val::Bottom(format!("no value at {}", path_str(path)));
        };
        self.stack.borrow_mut().push(path.clone());

        let mut vals = Vec::new();
        // Ancestor conjuncts contribute too: a value unified or filled at a
        // parent path must be visible when a child is read directly.
        let sels = path.selectors();
        for split in 0..sels.len() {
            let prefix = Path::new(sels[..split].iter().cloned());
            let Some(ancestor) = node_at(&self.tree.root, &prefix) else {
                continue;
            };
            for conjunct in &ancestor.conjuncts {
                let mut v = Some(self.eval_conjunct(conjunct));
                for sel in &sels[split..] {
                    v = v.and_then(|val| val.select(sel));
                    if v.is_none() {
                        break;
                    }
                }
                if let Some(v) = v {
                    vals.push(v);
                }
            }
        }
        for conjunct in &node.conjuncts {
            vals.push(self.eval_conjunct(conjunct));
        }
        if !node.children.is_empty() {
            let fields = node
                .children
                .iter()
                .map(|(key, child)| {
                    let cpath = path.child(crate::value::key_to_sel(key));
                    (
                        key.clone(),
                        FieldVal {
                            val: self.eval_at(&cpath),
                            optional: child.optional,
                        },
                    )
                })
                .collect();
            vals.push(Val::Struct(fields));
        }

        let out = vals
            .into_iter()
            .reduce(Self::unify_vals)
            .unwrap_or(Val::Type(TypeKind::Top));

        self.stack.borrow_mut().pop();
        self.memo.borrow_mut().insert(path.clone(), out.clone());
        out
    }

    fn eval_conjunct(&self, conjunct: &Conjunct) -> Val {
        match conjunct {
            Conjunct::Expr { expr, scope } => self.eval_expr(expr, scope, &[]),
            Conjunct::Ext(v) => Evaluator::new(&v.tree).eval_at(&v.path),
            Conjunct::Val(v) => (**v).clone(),
        }
    }

    fn eval_expr(&self, expr: &Expr, scope: &Path, frames: &[Frame]) -> Val {
        self.depth.set(self.depth.get() + 1);
        if self.depth.get() > MAX_DEPTH {
            self.depth.set(self.depth.get() - 1);
            return Val::Bottom("evaluation recursion limit reached".into());
        }
        let out = self.eval_expr_inner(expr, scope, frames);
        self.depth.set(self.depth.get() - 1);
        out
    }

    fn eval_expr_inner(&self, expr: &Expr, scope: &Path, frames: &[Frame]) -> Val {
        match expr {
            Expr::Null => Val::Null,
            Expr::Bool(b) => Val::Bool(*b),
            Expr::Int(v) => Val::Int(*v),
            Expr::Float(v) => Val::Float(*v),
            Expr::Type(k) => Val::Type(*k),
            Expr::String(parts) => self.eval_string(parts, scope, frames),
            Expr::Ident(name) => self.resolve(name, scope, frames),
            Expr::Selector(base, name) => {
                let base = self.eval_expr(base, scope, frames).resolve_default();
                match base {
                    Val::Pkg(pkg) => Val::Func(format!("{pkg}.{name}")),
                    Val::Struct(_) => {
                        let sel = Selector::parse(name);
                        match base.select(&sel) {
                            Some(v) => v,
                            None => Val::Bottom(format!("field not found: {name}")),
                        }
                    }
                    Val::Bottom(_) => base,
                    v => Val::Bottom(format!("cannot select {name} from {}", v.kind_name())),
                }
            }
            Expr::Index(base, idx) => {
                let base = self.eval_expr(base, scope, frames).resolve_default();
                let idx = self.eval_expr(idx, scope, frames).resolve_default();
                match (&base, &idx) {
                    (Val::List(_), Val::Int(i)) if *i >= 0 => {
                        #[allow(clippy::cast_sign_loss)]
                        let sel = Selector::Index(*i as usize);
                        base.clone()
                            .select(&sel)
                            .unwrap_or_else(|| Val::Bottom(format!("index out of range: {i}")))
                    }
                    (Val::Struct(_), Val::Str(name)) => base
                        .clone()
                        .select(&Selector::parse(name))
                        .unwrap_or_else(|| Val::Bottom(format!("field not found: {name}"))),
                    (Val::Bottom(_), _) => base.clone(),
                    _ => Val::Bottom(format!(
                        "cannot index {} with {}",
                        base.kind_name(),
                        idx.kind_name()
                    )),
                }
            }
            Expr::Call(callee, args) => {
                let callee = self.eval_expr(callee, scope, frames).resolve_default();
                match callee {
                    Val::Func(name) => {
                        let args: Vec<Val> = args
                            .iter()
                            .map(|a| self.eval_expr(a, scope, frames).resolve_default())
                            .collect();
                        builtin(&name, &args)
                    }
                    Val::Bottom(_) => callee,
                    v => Val::Bottom(format!("cannot call {}", v.kind_name())),
                }
            }
            Expr::Struct(decls) => {
                let mut next: Vec<Frame> = frames.to_vec();
                next.push(Rc::new(decls.clone()));
                let mut fields: Vec<(Key, FieldVal)> = Vec::new();
                for decl in decls {
                    let Decl::Field {
                        key,
                        optional,
                        value,
                    } = decl;
                    let val = self.eval_expr(value, scope, &next);
                    match fields.iter().position(|(k, _)| k == key) {
                        Some(i) => {
                            let merged = Self::unify_vals(fields[i].1.val.clone(), val);
                            let opt = fields[i].1.optional && *optional;
                            fields[i].1 = FieldVal {
                                val: merged,
                                optional: opt,
                            };
                        }
                        None => fields.push((
                            key.clone(),
                            FieldVal {
                                val,
                                optional: *optional,
                            },
                        )),
                    }
                }
                Val::Struct(fields)
            }
            Expr::List(items) => Val::List(
                items
                    .iter()
                    .map(|e| self.eval_expr(e, scope, frames))
                    .collect(),
            ),
            Expr::Binary(BinOp::And, lhs, rhs) => Self::unify_vals(
                self.eval_expr(lhs, scope, frames),
                self.eval_expr(rhs, scope, frames),
            ),
            Expr::Binary(BinOp::Or, _, _) => {
                let mut branches = Vec::new();
                or_branches(expr, &mut branches);
                let mut out = Vec::new();
                let mut default = None;
                for b in branches {
                    let (inner, is_default) = match b {
                        Expr::Default(inner) => (inner.as_ref(), true),
                        e => (e, false),
                    };
                    let v = self.eval_expr(inner, scope, frames);
                    if matches!(v, Val::Bottom(_)) {
                        continue;
                    }
                    if is_default && default.is_none() {
                        default = Some(Box::new(v.clone()));
                    }
                    out.push(v);
                }
                match (out.len(), &default) {
                    (0, _) => Val::Bottom("empty disjunction".into()),
                    (1, None) => out.remove(0),
                    _ => Val::Disj {
                        branches: out,
                        default,
                    },
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval_expr(lhs, scope, frames).resolve_default();
                let r = self.eval_expr(rhs, scope, frames).resolve_default();
                arith(*op, l, r)
            }
            Expr::Constraint(op, rhs) => {
                let rv = self.eval_expr(rhs, scope, frames).resolve_default();
                match rv {
                    Val::Int(_) | Val::Float(_) | Val::Str(_) | Val::Bool(_) | Val::Null => {
                        Val::Pred {
                            ty: None,
                            preds: vec![(*op, Box::new(rv))],
                        }
                    }
                    Val::Bottom(_) => rv,
                    v => Val::Bottom(format!("constraint bound is not concrete: {}", v.kind_name())),
                }
            }
            Expr::Default(inner) => self.eval_expr(inner, scope, frames),
        }
    }

    fn eval_string(&self, parts: &[StrPart], scope: &Path, frames: &[Frame]) -> Val {
        let mut out = String::new();
        for part in parts {
            match part {
                StrPart::Lit(s) => out.push_str(s),
                StrPart::Interp(e) => {
                    match self.eval_expr(e, scope, frames).resolve_default() {
                        Val::Str(s) => out.push_str(&s),
                        Val::Int(v) => out.push_str(&v.to_string()),
                        Val::Float(v) => out.push_str(&v.to_string()),
                        Val::Bool(v) => out.push_str(&v.to_string()),
                        Val::Bottom(msg) => return Val::Bottom(msg),
                        v => {
                            return Val::Bottom(format!(
                                "cannot interpolate {} into a string",
                                v.kind_name()
                            ));
                        }
                    }
                }
            }
        }
        Val::Str(out)
    }

    // Lexical resolution: struct-literal frames innermost-first, then the
    // composite scope chain, then imported builtin packages.
    fn resolve(&self, name: &str, scope: &Path, frames: &[Frame]) -> Val {
        let sel = Selector::parse(name);
        for (i, frame) in frames.iter().enumerate().rev() {
            let found = frame.iter().find_map(|d| {
                let Decl::Field { key, value, .. } = d;
                key_matches_sel(key, &sel).then_some(value)
            });
            if let Some(value) = found {
                return self.eval_expr(value, scope, &frames[..=i]);
            }
        }
        for depth in (0..=scope.selectors().len()).rev() {
            let prefix = Path::new(scope.selectors()[..depth].iter().cloned());
            let Some(node) = node_at(&self.tree.root, &prefix) else {
                continue;
            };
            if node.child_by_sel(&sel).is_some() {
                return self.eval_at(&prefix.child(sel));
            }
        }
        if self.tree.imports.contains_key(name) {
            return Val::Pkg(name.to_string());
        }
        Val::Bottom(format!("unresolved reference: {name}"))
    }

    pub(crate) fn unify_vals(a: Val, b: Val) -> Val {
        use Val::*;
        match (a, b) {
            (Bottom(a), Bottom(b)) => Bottom(format!("{a}; {b}")),
            (Bottom(m), _) | (_, Bottom(m)) => Bottom(m),
            (Type(TypeKind::Top), v) | (v, Type(TypeKind::Top)) => v,

            (Disj { branches, default }, other) | (other, Disj { branches, default }) => {
                let mut out = Vec::new();
                for b in branches {
                    let v = Self::unify_vals(b, other.clone());
                    if !matches!(v, Bottom(_)) {
                        out.push(v);
                    }
                }
                let default = default
                    .map(|d| Self::unify_vals(*d, other.clone()))
                    .filter(|v| !matches!(v, Bottom(_)))
                    .map(Box::new);
                match (out.len(), &default) {
                    (0, None) => Bottom("empty disjunction after unification".into()),
                    (1, None) => out.remove(0),
                    _ => Disj {
                        branches: out,
                        default,
                    },
                }
            }

            (Type(x), Type(y)) => match intersect_types(x, y) {
                Some(k) => Type(k),
                None => Bottom(format!("conflicting types {x:?} and {y:?}")),
            },
            (Type(k), Pred { ty, preds }) | (Pred { ty, preds }, Type(k)) => {
                let ty = match ty {
                    Some(t) => match intersect_types(k, t) {
                        Some(merged) => merged,
                        None => {
                            return Bottom(format!("conflicting types {k:?} and {t:?}"));
                        }
                    },
                    None => k,
                };
                Pred { ty: Some(ty), preds }
            }
            (Type(k), v) | (v, Type(k)) => {
                if type_admits(k, &v) {
                    v
                } else {
                    Bottom(format!("value {} does not satisfy {k:?}", v.kind_name()))
                }
            }

            (
                Pred { ty: ta, preds: pa },
                Pred { ty: tb, preds: pb },
            ) => {
                let ty = match (ta, tb) {
                    (Some(x), Some(y)) => match intersect_types(x, y) {
                        Some(k) => Some(k),
                        None => {
                            return Bottom(format!("conflicting types {x:?} and {y:?}"));
                        }
                    },
                    (x, y) => x.or(y),
                };
                let mut preds = pa;
                preds.extend(pb);
                Pred { ty, preds }
            }
            (Pred { ty, preds }, v) | (v, Pred { ty, preds }) => {
                if let Some(k) = ty {
                    if !type_admits(k, &v) {
                        return Bottom(format!("value {} does not satisfy {k:?}", v.kind_name()));
                    }
                }
                for (op, bound) in &preds {
                    if !pred_holds(*op, bound, &v) {
                        return Bottom(format!("value does not satisfy {op:?} {bound:?}"));
                    }
                }
                v
            }

            (Struct(a), Struct(b)) => {
                let mut out = a;
                for (key, fv) in b {
                    match out.iter().position(|(k, _)| k == &key) {
                        Some(i) => {
                            let merged = Self::unify_vals(out[i].1.val.clone(), fv.val);
                            let opt = out[i].1.optional && fv.optional;
                            out[i].1 = FieldVal {
                                val: merged,
                                optional: opt,
                            };
                        }
                        None => out.push((key, fv)),
                    }
                }
                Struct(out)
            }

            (List(a), List(b)) => {
                if a.len() != b.len() {
                    return Bottom(format!(
                        "conflicting list lengths {} and {}",
                        a.len(),
                        b.len()
                    ));
                }
                List(
                    a.into_iter()
                        .zip(b)
                        .map(|(x, y)| Self::unify_vals(x, y))
                        .collect(),
                )
            }

            (a, b) if a == b => a,
            (a, b) => Bottom(format!(
                "conflicting values {} and {}",
                a.kind_name(),
                b.kind_name()
            )),
        }
    }
}

fn or_branches<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            or_branches(lhs, out);
            or_branches(rhs, out);
        }
        e => out.push(e),
    }
}

fn intersect_types(a: TypeKind, b: TypeKind) -> Option<TypeKind> {
    use TypeKind::*;
    match (a, b) {
        (x, y) if x == y => Some(x),
        (Top, x) | (x, Top) => Some(x),
        (Number, Int) | (Int, Number) => Some(Int),
        (Number, Float) | (Float, Number) => Some(Float),
        _ => None,
    }
}

fn type_admits(k: TypeKind, v: &Val) -> bool {
    match (k, v) {
        (TypeKind::Top, _) => true,
        (TypeKind::String, Val::Str(_)) => true,
        (TypeKind::Bytes, Val::Str(_)) => true,
        (TypeKind::Int, Val::Int(_)) => true,
        (TypeKind::Float, Val::Float(_)) => true,
        (TypeKind::Number, Val::Int(_) | Val::Float(_)) => true,
        (TypeKind::Bool, Val::Bool(_)) => true,
        _ => false,
    }
}

fn pred_holds(op: CmpOp, bound: &Val, v: &Val) -> bool {
    use std::cmp::Ordering;
    let ord = match (v, bound) {
        (Val::Int(a), Val::Int(b)) => a.partial_cmp(b),
        (Val::Float(a), Val::Float(b)) => a.partial_cmp(b),
        (Val::Int(a), Val::Float(b)) => (*a as f64).partial_cmp(b),
        (Val::Float(a), Val::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
        (a, b) if op == CmpOp::Ne => return a != b,
        _ => None,
    };
    let Some(ord) = ord else {
        return false;
    };
    match op {
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Ne => ord != Ordering::Equal,
    }
}

fn arith(op: BinOp, l: Val, r: Val) -> Val {
    match (op, l, r) {
        (_, Val::Bottom(m), _) | (_, _, Val::Bottom(m)) => Val::Bottom(m),
        (BinOp::Add, Val::Int(a), Val::Int(b)) => Val::Int(a.wrapping_add(b)),
        (BinOp::Sub, Val::Int(a), Val::Int(b)) => Val::Int(a.wrapping_sub(b)),
        (BinOp::Mul, Val::Int(a), Val::Int(b)) => Val::Int(a.wrapping_mul(b)),
        (BinOp::Add, Val::Float(a), Val::Float(b)) => Val::Float(a + b),
        (BinOp::Sub, Val::Float(a), Val::Float(b)) => Val::Float(a - b),
        (BinOp::Mul, Val::Float(a), Val::Float(b)) => Val::Float(a * b),
        (BinOp::Add, Val::Str(a), Val::Str(b)) => Val::Str(a + &b),
        (op, l, r) => Val::Bottom(format!(
            "invalid operands for {op:?}: {} and {}",
            l.kind_name(),
            r.kind_name()
        )),
    }
}

fn builtin(name: &str, args: &[Val]) -> Val {
    match name {
        "uuid.SHA1" => match args {
            [Val::Str(ns), Val::Str(s)] => match Uuid::parse_str(ns) {
                Ok(ns) => Val::Str(Uuid::new_v5(&ns, s.as_bytes()).to_string()),
                Err(err) => Val::Bottom(format!("uuid.SHA1: bad namespace: {err}")),
            },
            _ => Val::Bottom("uuid.SHA1 expects (string, string)".into()),
        },
        "strings.Join" => match args {
            [Val::List(items), Val::Str(sep)] => {
                let mut parts = Vec::with_capacity(items.len());
                for v in items {
                    match v {
                        Val::Str(s) => parts.push(s.clone()),
                        v => {
                            return Val::Bottom(format!(
                                "strings.Join: element is {}",
                                v.kind_name()
                            ));
                        }
                    }
                }
                Val::Str(parts.join(sep))
            }
            _ => Val::Bottom("strings.Join expects (list, string)".into()),
        },
        name => Val::Bottom(format!("unknown builtin: {name}")),
    }
}
