//! Evaluated values and unification
//!
//! A package is evaluated by unifying the top-level declarations of all its
//! files into one struct. Identifiers resolve lexically; a reference to a
//! definition is replaced by the definition's value while remembering the
//! reference path, so callers can still tell `author: #User` apart from an
//! inline struct.
//!
//! ```text
//! files ──► root scope ──► eval_struct ──► Value (Struct)
//!                 ▲              │
//!                 └── resolve ◄──┘  (memoized per top-level label)
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ast::{Attribute, Decl, DeclKind, Expr, ExprKind, Field, File, Optionality, UnaryOp};
use crate::error::CueError;
use crate::format::{expr_to_string, quote};

/// Guards against runaway reference chains
const MAX_REF_DEPTH: usize = 32;

// ============================================================================
// Positions and kinds
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pos {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl Pos {
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        } else {
            write!(f, "-")
        }
    }
}

/// Kind of a value, ignoring whether it is concrete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Top,
    Bottom,
    Null,
    Bool,
    Int,
    Float,
    Number,
    String,
    Bytes,
    Struct,
    List,
    Unknown,
}

impl ValueKind {
    fn meet(self, other: ValueKind) -> Option<ValueKind> {
        use ValueKind::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (Number, Int) | (Int, Number) => Some(Int),
            (Number, Float) | (Float, Number) => Some(Float),
            _ => None,
        }
    }

    fn accepts(self, concrete: ValueKind) -> bool {
        use ValueKind::*;
        self == concrete
            || (self == Number && matches!(concrete, Int | Float))
            || (self == Float && concrete == Int)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Top => "_",
            ValueKind::Bottom => "_|_",
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Struct => "struct",
            ValueKind::List => "list",
            ValueKind::Unknown => "unknown",
        }
    }
}

fn builtin_kind(name: &str) -> Option<ValueKind> {
    Some(match name {
        "string" => ValueKind::String,
        "int" | "int8" | "int16" | "int32" | "int64" | "uint" | "uint8" | "uint16" | "uint32"
        | "uint64" | "rune" | "byte" => ValueKind::Int,
        "float" | "float32" | "float64" => ValueKind::Float,
        "number" => ValueKind::Number,
        "bool" => ValueKind::Bool,
        "bytes" => ValueKind::Bytes,
        _ => return None,
    })
}

// ============================================================================
// Value model
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub op: UnaryOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Top,
    Bottom(String),
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Type such as `string` or `int`
    Basic(ValueKind),
    /// Bounds and validator calls, e.g. `int & >=0` or `strings.MinRunes(3)`
    Constrained {
        base: Option<ValueKind>,
        bounds: Vec<Bound>,
        validators: Vec<String>,
    },
    Struct(StructValue),
    List {
        elems: Vec<Value>,
        rest: Option<Box<Value>>,
    },
    Disjunction {
        options: Vec<Value>,
        default: Option<usize>,
    },
    /// Reference that could not be resolved (imports, cycles)
    Ref(String),
}

impl Node {
    fn is_scalar(&self) -> bool {
        matches!(
            self,
            Node::Null | Node::Bool(_) | Node::Int(_) | Node::Float(_) | Node::Str(_)
        )
    }

    fn kind(&self) -> ValueKind {
        match self {
            Node::Top => ValueKind::Top,
            Node::Bottom(_) => ValueKind::Bottom,
            Node::Null => ValueKind::Null,
            Node::Bool(_) => ValueKind::Bool,
            Node::Int(_) => ValueKind::Int,
            Node::Float(_) => ValueKind::Float,
            Node::Str(_) => ValueKind::String,
            Node::Basic(k) => *k,
            Node::Constrained {
                base,
                bounds,
                validators,
            } => base.unwrap_or_else(|| {
                if let Some(b) = bounds.first() {
                    match b.value.node.kind() {
                        ValueKind::Int | ValueKind::Float => ValueKind::Number,
                        _ if matches!(b.op, UnaryOp::Match | UnaryOp::NotMatch) => ValueKind::String,
                        other => other,
                    }
                } else if validators.iter().any(|v| v.starts_with("strings.")) {
                    ValueKind::String
                } else {
                    ValueKind::Unknown
                }
            }),
            Node::Struct(_) => ValueKind::Struct,
            Node::List { .. } => ValueKind::List,
            Node::Disjunction { options, .. } => {
                let mut kinds = options.iter().map(|o| o.node.kind());
                let Some(first) = kinds.next() else {
                    return ValueKind::Bottom;
                };
                kinds.try_fold(first, |acc, k| {
                    if acc == k {
                        Some(acc)
                    } else {
                        match (acc, k) {
                            (ValueKind::Int | ValueKind::Float | ValueKind::Number, ValueKind::Int | ValueKind::Float | ValueKind::Number) => {
                                Some(ValueKind::Number)
                            }
                            _ => None,
                        }
                    }
                })
                .unwrap_or(ValueKind::Unknown)
            }
            Node::Ref(_) => ValueKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructValue {
    pub fields: Vec<FieldValue>,
    /// Declaration attributes written inside the struct body
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    /// Label as written, including `#` or `_` prefixes
    pub label: String,
    pub optional: Optionality,
    pub value: Value,
}

impl FieldValue {
    pub fn is_definition(&self) -> bool {
        self.label.starts_with('#') || self.label.starts_with("_#")
    }

    pub fn is_hidden(&self) -> bool {
        self.label.starts_with('_')
    }

    pub fn is_optional(&self) -> bool {
        self.optional == Optionality::Optional
    }

    /// Label without the definition marker
    pub fn name(&self) -> &str {
        self.label.trim_start_matches('_').trim_start_matches('#')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    node: Node,
    attrs: Vec<Attribute>,
    pos: Pos,
    reference: Option<String>,
}

impl Default for Value {
    fn default() -> Self {
        Self::top()
    }
}

impl Value {
    pub fn top() -> Self {
        Self::from_node(Node::Top)
    }

    pub fn bottom(message: impl Into<String>) -> Self {
        Self::from_node(Node::Bottom(message.into()))
    }

    pub fn from_node(node: Node) -> Self {
        Self {
            node,
            attrs: Vec::new(),
            pos: Pos::default(),
            reference: None,
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn pos(&self) -> &Pos {
        &self.pos
    }

    /// Reference path when this value came from `#Name` or `a.b`
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn kind(&self) -> ValueKind {
        self.node.kind()
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self.node, Node::Bottom(_))
    }

    /// Default of a disjunction, or the value itself
    pub fn default_value(&self) -> &Value {
        match &self.node {
            Node::Disjunction {
                options,
                default: Some(d),
            } => options.get(*d).unwrap_or(self),
            _ => self,
        }
    }

    pub fn is_concrete(&self) -> bool {
        let v = self.default_value();
        v.node.is_scalar() || matches!(v.node, Node::Struct(_) | Node::List { .. })
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.default_value().node {
            Node::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.default_value().node {
            Node::Int(i) => Some(*i),
            Node::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.default_value().node {
            Node::Int(i) => Some(*i as f64),
            Node::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.default_value().node {
            Node::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match &self.default_value().node {
            Node::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// All fields including definitions, hidden and optional ones
    pub fn fields(&self) -> &[FieldValue] {
        self.as_struct().map(|s| s.fields.as_slice()).unwrap_or(&[])
    }

    pub fn field(&self, label: &str) -> Option<&FieldValue> {
        self.fields().iter().find(|f| f.label == label)
    }

    /// Walk a dotted path such as `jwt.alg`
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for part in path.split('.').filter(|p| !p.is_empty()) {
            cur = &cur.field(part)?.value;
        }
        Some(cur)
    }

    /// Concrete list elements
    pub fn list(&self) -> Option<&[Value]> {
        match &self.default_value().node {
            Node::List { elems, .. } => Some(elems),
            _ => None,
        }
    }

    /// Element type of an open list (`[...T]`)
    pub fn list_rest(&self) -> Option<&Value> {
        match &self.default_value().node {
            Node::List { rest, .. } => rest.as_deref(),
            _ => None,
        }
    }

    /// String literals of an enum-like disjunction
    pub fn string_options(&self) -> Vec<String> {
        match &self.node {
            Node::Disjunction { options, .. } => options
                .iter()
                .filter_map(|o| o.as_str().map(str::to_string))
                .collect(),
            Node::Str(s) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn validators(&self) -> &[String] {
        match &self.node {
            Node::Constrained { validators, .. } => validators,
            _ => &[],
        }
    }

    /// Field attributes first, then declaration attributes of a struct body
    pub fn attributes(&self) -> Vec<Attr> {
        let decl_attrs = match &self.node {
            Node::Struct(s) => s.attrs.as_slice(),
            _ => &[],
        };
        self.attrs.iter().chain(decl_attrs).map(Attr::parse).collect()
    }

    pub fn attribute(&self, name: &str) -> Option<Attr> {
        self.attributes().into_iter().find(|a| a.name == name)
    }

    /// Concrete data as JSON; non-concrete fields are left out
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match &self.default_value().node {
            Node::Null => J::Null,
            Node::Bool(b) => J::Bool(*b),
            Node::Int(i) => J::from(*i),
            Node::Float(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
            Node::Str(s) => J::String(s.clone()),
            Node::Struct(s) => J::Object(
                s.fields
                    .iter()
                    .filter(|f| !f.is_hidden() && !f.is_definition() && f.value.is_concrete())
                    .map(|f| (f.label.clone(), f.value.to_json()))
                    .collect(),
            ),
            Node::List { elems, .. } => J::Array(elems.iter().map(Value::to_json).collect()),
            _ => J::Null,
        }
    }

    /// CUE rendering of scalars (`"text"`, `3`, `true`) and type names
    pub fn to_cue_string(&self) -> String {
        match &self.default_value().node {
            Node::Null => "null".to_string(),
            Node::Bool(b) => b.to_string(),
            Node::Int(i) => i.to_string(),
            Node::Float(f) if f.fract() == 0.0 => format!("{f:.1}"),
            Node::Float(f) => f.to_string(),
            Node::Str(s) => quote(s),
            Node::Ref(r) => r.clone(),
            other => other.kind().as_str().to_string(),
        }
    }
}

// ============================================================================
// Attributes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrArg {
    /// Empty for positional arguments
    pub key: String,
    pub value: String,
    pub raw: String,
}

/// Parsed view of `@name(a, key=value, ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    contents: String,
    args: Vec<AttrArg>,
}

impl Attr {
    pub fn parse(attr: &Attribute) -> Attr {
        let args = split_args(&attr.body)
            .into_iter()
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                let (key, value) = match raw.split_once('=') {
                    Some((k, v))
                        if !k.trim().is_empty()
                            && k.trim().chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') =>
                    {
                        (k.trim().to_string(), unquote(v.trim()))
                    }
                    _ => (String::new(), unquote(&raw)),
                };
                AttrArg { key, value, raw }
            })
            .collect();
        Attr {
            name: attr.name.clone(),
            contents: attr.body.clone(),
            args,
        }
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn args(&self) -> &[AttrArg] {
        &self.args
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    /// With an empty key, the argument at `pos`; otherwise the value of the
    /// first `key=value` argument at or after `pos`
    pub fn lookup(&self, pos: usize, key: &str) -> Option<&str> {
        if key.is_empty() {
            return self.args.get(pos).map(|a| {
                if a.key.is_empty() {
                    a.value.as_str()
                } else {
                    a.raw.as_str()
                }
            });
        }
        self.args
            .iter()
            .skip(pos)
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Bare flag argument (`@rbac(admin)`) or `key=true`
    pub fn flag(&self, key: &str) -> bool {
        self.args
            .iter()
            .any(|a| (a.key.is_empty() && a.value == key) || (a.key == key && a.value == "true"))
    }
}

fn split_args(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut depth = 0i32;
    let mut quote_char: Option<char> = None;
    let mut escaped = false;
    for c in body.chars() {
        if let Some(q) = quote_char {
            cur.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote_char = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote_char = Some(c);
                cur.push(c);
            }
            '(' | '[' | '{' => {
                depth += 1;
                cur.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                cur.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut cur).trim().to_string()),
            _ => cur.push(c),
        }
    }
    out.push(cur.trim().to_string());
    out
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    } else {
        s.to_string()
    }
}

// ============================================================================
// Unification
// ============================================================================

fn join_path(path: &str, label: &str) -> String {
    if path.is_empty() {
        label.to_string()
    } else {
        format!("{path}.{label}")
    }
}

fn conflict(path: &str, message: String, pos: &Pos) -> CueError {
    CueError::Conflict {
        path: if path.is_empty() { "<root>".to_string() } else { path.to_string() },
        message,
        pos: pos.clone(),
    }
}

fn merge_optional(a: Optionality, b: Optionality) -> Optionality {
    match (a, b) {
        (x, y) if x == y => x,
        (Optionality::Optional, other) | (other, Optionality::Optional) => other,
        _ => Optionality::Required,
    }
}

impl StructValue {
    fn merge_field(&mut self, field: FieldValue, path: &str) -> Result<(), CueError> {
        match self.fields.iter_mut().find(|e| e.label == field.label) {
            Some(existing) => {
                existing.optional = merge_optional(existing.optional, field.optional);
                let child = join_path(path, &field.label);
                let current = std::mem::take(&mut existing.value);
                match unify(current, field.value, &child) {
                    Ok(v) => {
                        existing.value = v;
                        Ok(())
                    }
                    Err(e) => {
                        existing.value = Value::bottom(e.to_string());
                        Err(e)
                    }
                }
            }
            None => {
                self.fields.push(field);
                Ok(())
            }
        }
    }

    fn merge(&mut self, other: StructValue, path: &str) -> Result<(), CueError> {
        for attr in other.attrs {
            if !self.attrs.contains(&attr) {
                self.attrs.push(attr);
            }
        }
        let mut first_err = None;
        for field in other.fields {
            if let Err(e) = self.merge_field(field, path) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Meet of two values; conflicting concrete values are an error
pub fn unify(a: Value, b: Value, path: &str) -> Result<Value, CueError> {
    let mut attrs = a.attrs;
    for attr in b.attrs {
        if !attrs.contains(&attr) {
            attrs.push(attr);
        }
    }
    let at = if b.pos.is_valid() { b.pos.clone() } else { a.pos.clone() };
    let pos = if a.pos.is_valid() { a.pos } else { b.pos };
    let reference = a.reference.or(b.reference);
    let node = unify_nodes(a.node, b.node, path, &at)?;
    Ok(Value {
        node,
        attrs,
        pos,
        reference,
    })
}

fn unify_nodes(a: Node, b: Node, path: &str, at: &Pos) -> Result<Node, CueError> {
    use Node::*;
    match (a, b) {
        (Top, n) | (n, Top) => Ok(n),
        (Bottom(m), _) | (_, Bottom(m)) => Ok(Bottom(m)),
        (Ref(r), Ref(_)) => Ok(Ref(r)),
        (Ref(_), n) | (n, Ref(_)) => Ok(n),
        (Disjunction { options, default }, other) | (other, Disjunction { options, default }) => {
            unify_disjunction(options, default, Value::from_node(other), path, at)
        }
        (Struct(mut x), Struct(y)) => {
            x.merge(y, path)?;
            Ok(Struct(x))
        }
        (List { elems: e1, rest: r1 }, List { elems: e2, rest: r2 }) => {
            unify_lists(e1, r1, e2, r2, path, at)
        }
        (Basic(k1), Basic(k2)) => k1.meet(k2).map(Basic).ok_or_else(|| {
            conflict(
                path,
                format!("conflicting values {} and {}", k1.as_str(), k2.as_str()),
                at,
            )
        }),
        (Basic(k), c) | (c, Basic(k)) if c.is_scalar() => {
            if k.accepts(c.kind()) {
                Ok(c)
            } else {
                Err(conflict(
                    path,
                    format!(
                        "conflicting values {} and {} (mismatched types {} and {})",
                        k.as_str(),
                        Value::from_node(c.clone()).to_cue_string(),
                        k.as_str(),
                        c.kind().as_str()
                    ),
                    at,
                ))
            }
        }
        (
            Constrained {
                base: b1,
                bounds: mut bo1,
                validators: mut v1,
            },
            Constrained {
                base: b2,
                bounds: bo2,
                validators: v2,
            },
        ) => {
            let base = match (b1, b2) {
                (Some(x), Some(y)) => Some(x.meet(y).ok_or_else(|| {
                    conflict(
                        path,
                        format!("conflicting values {} and {}", x.as_str(), y.as_str()),
                        at,
                    )
                })?),
                (x, y) => x.or(y),
            };
            bo1.extend(bo2);
            v1.extend(v2);
            Ok(Constrained {
                base,
                bounds: bo1,
                validators: v1,
            })
        }
        (
            Constrained {
                base,
                bounds,
                validators,
            },
            Basic(k),
        )
        | (
            Basic(k),
            Constrained {
                base,
                bounds,
                validators,
            },
        ) => {
            let base = match base {
                Some(b) => b.meet(k).ok_or_else(|| {
                    conflict(
                        path,
                        format!("conflicting values {} and {}", b.as_str(), k.as_str()),
                        at,
                    )
                })?,
                None => k,
            };
            Ok(Constrained {
                base: Some(base),
                bounds,
                validators,
            })
        }
        (Constrained { base, bounds, .. }, c) | (c, Constrained { base, bounds, .. })
            if c.is_scalar() =>
        {
            if let Some(k) = base {
                if !k.accepts(c.kind()) {
                    return Err(conflict(
                        path,
                        format!("conflicting values {} and {}", k.as_str(), c.kind().as_str()),
                        at,
                    ));
                }
            }
            check_bounds(&c, &bounds).map_err(|m| conflict(path, m, at))?;
            Ok(c)
        }
        (x, y) if x.is_scalar() && y.is_scalar() => {
            if x == y {
                Ok(x)
            } else {
                Err(conflict(
                    path,
                    format!(
                        "conflicting values {} and {}",
                        Value::from_node(x).to_cue_string(),
                        Value::from_node(y).to_cue_string()
                    ),
                    at,
                ))
            }
        }
        (x, y) => Err(conflict(
            path,
            format!(
                "conflicting values (mismatched types {} and {})",
                x.kind().as_str(),
                y.kind().as_str()
            ),
            at,
        )),
    }
}

fn unify_disjunction(
    options: Vec<Value>,
    default: Option<usize>,
    other: Value,
    path: &str,
    at: &Pos,
) -> Result<Node, CueError> {
    let mut out: Vec<Value> = Vec::new();
    let mut new_default = None;
    for (i, option) in options.into_iter().enumerate() {
        let Ok(v) = unify(option, other.clone(), path) else {
            continue;
        };
        let outer_default = default.map_or(true, |d| d == i);
        match v.node {
            Node::Bottom(_) => {}
            Node::Disjunction {
                options: inner,
                default: inner_default,
            } => {
                for (j, o) in inner.into_iter().enumerate() {
                    let is_default = (default.is_some() || inner_default.is_some())
                        && outer_default
                        && inner_default.map_or(true, |d| d == j);
                    push_option(&mut out, o, is_default, &mut new_default);
                }
            }
            _ => {
                let is_default = default.is_some() && outer_default;
                push_option(&mut out, v, is_default, &mut new_default);
            }
        }
    }
    match out.len() {
        0 => Err(conflict(path, "empty disjunction".to_string(), at)),
        1 => Ok(out.remove(0).node),
        _ => Ok(Node::Disjunction {
            options: out,
            default: new_default,
        }),
    }
}

fn push_option(out: &mut Vec<Value>, v: Value, is_default: bool, default: &mut Option<usize>) {
    let idx = match out.iter().position(|o| o.node == v.node) {
        Some(idx) => idx,
        None => {
            out.push(v);
            out.len() - 1
        }
    };
    if is_default && default.is_none() {
        *default = Some(idx);
    }
}

fn unify_lists(
    e1: Vec<Value>,
    r1: Option<Box<Value>>,
    e2: Vec<Value>,
    r2: Option<Box<Value>>,
    path: &str,
    at: &Pos,
) -> Result<Node, CueError> {
    if (r1.is_none() && e2.len() > e1.len()) || (r2.is_none() && e1.len() > e2.len()) {
        return Err(conflict(
            path,
            format!("incompatible list lengths ({} and {})", e1.len(), e2.len()),
            at,
        ));
    }
    let n = e1.len().max(e2.len());
    let mut it1 = e1.into_iter();
    let mut it2 = e2.into_iter();
    let mut elems = Vec::with_capacity(n);
    for i in 0..n {
        let a = it1.next().or_else(|| r1.as_deref().cloned()).unwrap_or_default();
        let b = it2.next().or_else(|| r2.as_deref().cloned()).unwrap_or_default();
        elems.push(unify(a, b, &join_path(path, &i.to_string()))?);
    }
    let rest = match (r1, r2) {
        (Some(a), Some(b)) => Some(Box::new(unify(*a, *b, path)?)),
        _ => None,
    };
    Ok(Node::List { elems, rest })
}

fn check_bounds(c: &Node, bounds: &[Bound]) -> Result<(), String> {
    for bound in bounds {
        let ok = match (bound.op, c, &bound.value.node) {
            (UnaryOp::Ne, c, v) => c != v,
            (UnaryOp::Match, Node::Str(s), Node::Str(p)) => {
                Regex::new(p).map(|re| re.is_match(s)).unwrap_or(true)
            }
            (UnaryOp::NotMatch, Node::Str(s), Node::Str(p)) => {
                Regex::new(p).map(|re| !re.is_match(s)).unwrap_or(true)
            }
            (op, Node::Str(s), Node::Str(b)) => compare(op, s.as_str().cmp(b.as_str())),
            (op, c, b) => match (num(c), num(b)) {
                (Some(x), Some(y)) => x.partial_cmp(&y).map_or(false, |o| compare(op, o)),
                _ => false,
            },
        };
        if !ok {
            return Err(format!(
                "invalid value {} (out of bound {}{})",
                Value::from_node(c.clone()).to_cue_string(),
                bound.op.symbol(),
                bound.value.to_cue_string()
            ));
        }
    }
    Ok(())
}

fn num(n: &Node) -> Option<f64> {
    match n {
        Node::Int(i) => Some(*i as f64),
        Node::Float(f) => Some(*f),
        _ => None,
    }
}

fn compare(op: UnaryOp, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        UnaryOp::Ge => ord != Less,
        UnaryOp::Gt => ord == Greater,
        UnaryOp::Le => ord != Greater,
        UnaryOp::Lt => ord == Less,
        _ => true,
    }
}

// ============================================================================
// Evaluation
// ============================================================================

type Scope<'a> = Vec<(usize, &'a Decl)>;

/// Unify the top-level declarations of one package into a single value
pub fn evaluate(files: &[File]) -> Result<Value, CueError> {
    let mut package: Option<&str> = None;
    for file in files {
        if let Some(name) = file.package.as_deref() {
            match package {
                Some(first) if first != name => {
                    return Err(CueError::PackageMismatch {
                        first: first.to_string(),
                        second: name.to_string(),
                        file: file.filename.clone(),
                    });
                }
                None => package = Some(name),
                _ => {}
            }
        }
    }

    let root: Scope<'_> = files
        .iter()
        .enumerate()
        .flat_map(|(i, f)| f.decls.iter().map(move |d| (i, d)))
        .collect();
    let mut ev = Evaluator {
        files,
        memo: HashMap::new(),
        resolving: HashSet::new(),
        errors: Vec::new(),
    };
    let mut stack = vec![root];
    let root_struct = ev.eval_struct(&mut stack, "");
    tracing::debug!(
        files = files.len(),
        fields = root_struct.fields.len(),
        "evaluated package"
    );
    if let Some(err) = ev.errors.into_iter().next() {
        return Err(err);
    }
    Ok(Value::from_node(Node::Struct(root_struct)))
}

struct Evaluator<'a> {
    files: &'a [File],
    memo: HashMap<String, Value>,
    resolving: HashSet<usize>,
    errors: Vec<CueError>,
}

fn binds(decl: &Decl, name: &str) -> bool {
    match &decl.kind {
        DeclKind::Field(f) => f.label.name() == Some(name),
        DeclKind::Let { name: n, .. } => n == name,
        _ => false,
    }
}

fn parse_number(raw: &str) -> Node {
    if raw.contains(['.', 'e', 'E']) {
        raw.parse::<f64>().map(Node::Float).unwrap_or_else(|_| Node::Bottom(format!("invalid number {raw}")))
    } else {
        raw.parse::<i64>()
            .map(Node::Int)
            .or_else(|_| raw.parse::<f64>().map(Node::Float))
            .unwrap_or_else(|_| Node::Bottom(format!("invalid number {raw}")))
    }
}

impl<'a> Evaluator<'a> {
    fn pos(&self, file: usize, offset: usize) -> Pos {
        self.files
            .get(file)
            .map(|f| {
                let (line, column) = f.line_col(offset);
                Pos {
                    file: f.filename.clone(),
                    line,
                    column,
                }
            })
            .unwrap_or_default()
    }

    fn record(&mut self, err: CueError) -> Value {
        let v = Value::bottom(err.to_string());
        self.errors.push(err);
        v
    }

    fn eval_struct(&mut self, stack: &mut Vec<Scope<'a>>, path: &str) -> StructValue {
        let scope = stack.last().cloned().unwrap_or_default();
        let mut out = StructValue::default();
        for (file, decl) in scope {
            match &decl.kind {
                DeclKind::Field(field) => {
                    let Some(label) = field.label.name() else {
                        continue;
                    };
                    let child = join_path(path, label);
                    let value = self.eval_field(field, decl, file, stack, &child);
                    let fv = FieldValue {
                        label: label.to_string(),
                        optional: field.optional,
                        value,
                    };
                    if let Err(e) = out.merge_field(fv, path) {
                        self.errors.push(e);
                    }
                }
                DeclKind::Embed(expr) => {
                    let v = self.eval_expr(expr, file, stack, path);
                    if let Node::Struct(s) = v.node {
                        if let Err(e) = out.merge(s, path) {
                            self.errors.push(e);
                        }
                    }
                }
                DeclKind::Attribute(attr) => out.attrs.push(attr.clone()),
                DeclKind::Let { .. } => {}
            }
        }
        out
    }

    fn eval_field(
        &mut self,
        field: &'a Field,
        decl: &'a Decl,
        file: usize,
        stack: &mut Vec<Scope<'a>>,
        path: &str,
    ) -> Value {
        let mut v = self.eval_expr(&field.value, file, stack, path);
        let mut attrs = field.attrs.clone();
        attrs.append(&mut v.attrs);
        v.attrs = attrs;
        v.pos = self.pos(file, decl.span.start);
        v
    }

    fn eval_expr(
        &mut self,
        expr: &'a Expr,
        file: usize,
        stack: &mut Vec<Scope<'a>>,
        path: &str,
    ) -> Value {
        let pos = self.pos(file, expr.span.start);
        let node = match &expr.kind {
            ExprKind::Struct(lit) => {
                stack.push(lit.decls.iter().map(|d| (file, d)).collect());
                let s = self.eval_struct(stack, path);
                stack.pop();
                Node::Struct(s)
            }
            ExprKind::List(lit) => {
                let mut elems = Vec::with_capacity(lit.elems.len());
                for (i, e) in lit.elems.iter().enumerate() {
                    elems.push(self.eval_expr(e, file, stack, &join_path(path, &i.to_string())));
                }
                let rest = lit
                    .rest
                    .as_ref()
                    .map(|r| Box::new(self.eval_expr(r, file, stack, path)));
                Node::List { elems, rest }
            }
            ExprKind::Str { value, .. } => Node::Str(value.clone()),
            ExprKind::Number(raw) => parse_number(raw),
            ExprKind::Bool(b) => Node::Bool(*b),
            ExprKind::Null => Node::Null,
            ExprKind::Top => Node::Top,
            ExprKind::Bottom => Node::Bottom("explicit error (_|_ literal)".to_string()),
            ExprKind::Ident(name) => return self.resolve_ident(name, stack, pos),
            ExprKind::Selector(..) => return self.resolve_selector(expr, stack, pos),
            ExprKind::Call { .. } => Node::Constrained {
                base: None,
                bounds: Vec::new(),
                validators: vec![expr_to_string(expr)],
            },
            ExprKind::Unary { op, expr: inner } => {
                let v = self.eval_expr(inner, file, stack, path);
                apply_unary(*op, v)
            }
            ExprKind::Binary {
                op: crate::ast::BinaryOp::And,
                lhs,
                rhs,
            } => {
                let l = self.eval_expr(lhs, file, stack, path);
                let r = self.eval_expr(rhs, file, stack, path);
                return match unify(l, r, path) {
                    Ok(mut v) => {
                        if !v.pos.is_valid() {
                            v.pos = pos;
                        }
                        v
                    }
                    Err(e) => self.record(e),
                };
            }
            ExprKind::Binary {
                op: crate::ast::BinaryOp::Or,
                ..
            } => {
                let mut marked = Vec::new();
                collect_disjuncts(expr, false, &mut marked);
                let mut options = Vec::new();
                let mut default = None;
                for (e, is_default) in marked {
                    let v = self.eval_expr(e, file, stack, path);
                    match v.node {
                        Node::Disjunction {
                            options: inner,
                            default: inner_default,
                        } => {
                            for (j, o) in inner.into_iter().enumerate() {
                                let d = is_default || inner_default == Some(j);
                                push_option(&mut options, o, d, &mut default);
                            }
                        }
                        _ => push_option(&mut options, v, is_default, &mut default),
                    }
                }
                if options.len() == 1 && default.is_none() {
                    let mut only = options.remove(0);
                    only.pos = pos;
                    return only;
                }
                Node::Disjunction { options, default }
            }
            ExprKind::Default(inner) => {
                let v = self.eval_expr(inner, file, stack, path);
                Node::Disjunction {
                    options: vec![v],
                    default: Some(0),
                }
            }
            ExprKind::Paren(inner) => return self.eval_expr(inner, file, stack, path),
        };
        Value {
            node,
            attrs: Vec::new(),
            pos,
            reference: None,
        }
    }

    fn resolve_ident(&mut self, name: &str, stack: &[Scope<'a>], pos: Pos) -> Value {
        if let Some(kind) = builtin_kind(name) {
            let mut v = Value::from_node(Node::Basic(kind));
            v.pos = pos;
            return v;
        }
        let unresolved = |pos: Pos| Value {
            node: Node::Ref(name.to_string()),
            attrs: Vec::new(),
            pos,
            reference: Some(name.to_string()),
        };

        for depth in (0..stack.len()).rev() {
            let hits: Vec<(usize, &'a Decl)> = stack[depth]
                .iter()
                .copied()
                .filter(|(_, d)| binds(d, name))
                .collect();
            let Some(&(_, first)) = hits.first() else {
                continue;
            };
            let key = first as *const Decl as usize;

            let cached = if depth == 0 {
                self.memo.get(name).cloned()
            } else {
                None
            };
            let mut value = match cached {
                Some(v) => v,
                None => {
                    if self.resolving.contains(&key) || self.resolving.len() >= MAX_REF_DEPTH {
                        return unresolved(pos);
                    }
                    self.resolving.insert(key);
                    let mut scope: Vec<Scope<'a>> = stack[..=depth].to_vec();
                    let mut acc = Value::top();
                    for (file, decl) in hits {
                        let expr = match &decl.kind {
                            DeclKind::Field(f) => &f.value,
                            DeclKind::Let { value, .. } => value,
                            _ => continue,
                        };
                        let v = self.eval_expr(expr, file, &mut scope, name);
                        acc = match unify(acc, v, name) {
                            Ok(v) => v,
                            Err(e) => self.record(e),
                        };
                    }
                    self.resolving.remove(&key);
                    if depth == 0 {
                        self.memo.insert(name.to_string(), acc.clone());
                    }
                    acc
                }
            };
            value.attrs.clear();
            value.pos = pos;
            value.reference = Some(name.to_string());
            return value;
        }
        unresolved(pos)
    }

    fn resolve_selector(&mut self, expr: &'a Expr, stack: &[Scope<'a>], pos: Pos) -> Value {
        let text = expr_to_string(expr);
        let unresolved = |pos: Pos| Value {
            node: Node::Ref(text.clone()),
            attrs: Vec::new(),
            pos,
            reference: Some(text.clone()),
        };

        let mut parts = Vec::new();
        let mut cur = expr;
        loop {
            match &cur.kind {
                ExprKind::Selector(base, sel) => {
                    parts.push(sel.as_str());
                    cur = base;
                }
                ExprKind::Ident(name) => {
                    parts.push(name.as_str());
                    break;
                }
                _ => return unresolved(pos),
            }
        }
        parts.reverse();

        let base = self.resolve_ident(parts[0], stack, pos.clone());
        if matches!(base.node, Node::Ref(_)) {
            return unresolved(pos);
        }
        match base.lookup(&parts[1..].join(".")) {
            Some(v) => {
                let mut v = v.clone();
                v.attrs.clear();
                v.pos = pos;
                v.reference = Some(text.clone());
                v
            }
            None => unresolved(pos),
        }
    }
}

fn collect_disjuncts<'e>(expr: &'e Expr, default: bool, out: &mut Vec<(&'e Expr, bool)>) {
    match &expr.kind {
        ExprKind::Binary {
            op: crate::ast::BinaryOp::Or,
            lhs,
            rhs,
        } => {
            collect_disjuncts(lhs, default, out);
            collect_disjuncts(rhs, default, out);
        }
        ExprKind::Default(inner) => collect_disjuncts(inner, true, out),
        _ => out.push((expr, default)),
    }
}

fn apply_unary(op: UnaryOp, v: Value) -> Node {
    match (op, v.node) {
        (UnaryOp::Neg, Node::Int(i)) => Node::Int(-i),
        (UnaryOp::Neg, Node::Float(f)) => Node::Float(-f),
        (UnaryOp::Not, Node::Bool(b)) => Node::Bool(!b),
        (UnaryOp::Neg | UnaryOp::Not, other) => {
            Node::Bottom(format!("invalid operand {} for {}", other.kind().as_str(), op.symbol()))
        }
        (op, node) if node.is_scalar() => Node::Constrained {
            base: None,
            bounds: vec![Bound {
                op,
                value: Value::from_node(node),
            }],
            validators: Vec::new(),
        },
        (op, other) => Node::Bottom(format!(
            "bound {} requires a concrete value, found {}",
            op.symbol(),
            other.kind().as_str()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;
    use pretty_assertions::assert_eq;

    fn eval(sources: &[(&str, &str)]) -> Result<Value, CueError> {
        let files: Vec<File> = sources
            .iter()
            .map(|(name, src)| parse_file(name, src).unwrap())
            .collect();
        evaluate(&files)
    }

    #[test]
    fn test_fields_and_lookup() {
        let v = eval(&[("a.cue", "package x\n#Auth: jwt: {\n\talg: *\"RS256\" | \"HS256\"\n\tissuer: \"ang\"\n}\n")]).unwrap();
        assert_eq!(v.lookup("#Auth.jwt.alg").and_then(Value::as_str), Some("RS256"));
        assert_eq!(v.lookup("#Auth.jwt.issuer").and_then(Value::as_str), Some("ang"));
        assert!(v.lookup("#Auth.missing").is_none());
    }

    #[test]
    fn test_unify_across_files() {
        let v = eval(&[
            ("cue/domain/a.cue", "package domain\n#User: name: string\n"),
            ("cue/domain/b.cue", "package domain\n#User: email: string\n#User: name: \"ann\"\n"),
        ])
        .unwrap();
        let user = v.lookup("#User").unwrap();
        let names: Vec<&str> = user.fields().iter().map(|f| f.label.as_str()).collect();
        assert_eq!(names, vec!["name", "email"]);
        assert_eq!(user.lookup("name").and_then(Value::as_str), Some("ann"));
    }

    #[test]
    fn test_conflict_reports_position() {
        let err = eval(&[("cue/api/x.cue", "package api\na: 1\na: 2\n")]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("conflicting values 1 and 2"), "{msg}");
        assert!(msg.contains("cue/api/x.cue:3"), "{msg}");
    }

    #[test]
    fn test_type_and_bound_checks() {
        assert!(eval(&[("x.cue", "a: int & >=0\na: 5\n")]).is_ok());
        let err = eval(&[("x.cue", "a: int & >=0\na: -1\n")]).unwrap_err();
        assert!(err.to_string().contains("out of bound >=0"));
        assert!(eval(&[("x.cue", "a: string\na: 1\n")]).is_err());
        assert!(eval(&[("x.cue", "a: =~\"^[a-z]+$\"\na: \"abc\"\n")]).is_ok());
        assert!(eval(&[("x.cue", "a: =~\"^[a-z]+$\"\na: \"ABC\"\n")]).is_err());
    }

    #[test]
    fn test_references_keep_path() {
        let v = eval(&[(
            "x.cue",
            "#User: {\n\tid: string\n}\n#Post: {\n\tauthor: #User\n\ttags: [...#User]\n}\n",
        )])
        .unwrap();
        let author = v.lookup("#Post.author").unwrap();
        assert_eq!(author.reference(), Some("#User"));
        assert!(author.lookup("id").is_some());
        let rest = v.lookup("#Post.tags").and_then(Value::list_rest).unwrap();
        assert_eq!(rest.reference(), Some("#User"));
    }

    #[test]
    fn test_cyclic_references_terminate() {
        let v = eval(&[(
            "x.cue",
            "#A: {\n\tb: #B\n}\n#B: {\n\ta: #A\n}\n",
        )])
        .unwrap();
        assert!(v.lookup("#A.b").is_some());
    }

    #[test]
    fn test_embedding_merges_fields() {
        let v = eval(&[(
            "x.cue",
            "#Base: {\n\tid: string\n}\n#Order: {\n\t#Base\n\t@owner(orders)\n\ttotal: int\n}\n",
        )])
        .unwrap();
        let order = v.lookup("#Order").unwrap();
        assert!(order.lookup("id").is_some());
        assert_eq!(
            order.attribute("owner").and_then(|a| a.lookup(0, "").map(str::to_string)),
            Some("orders".to_string())
        );
    }

    #[test]
    fn test_attributes_parse() {
        let v = eval(&[(
            "x.cue",
            "id: string @db(type=\"uuid\", primary_key) @ui(label=\"User ID\", order=1)\n",
        )])
        .unwrap();
        let id = v.lookup("id").unwrap();
        let db = id.attribute("db").unwrap();
        assert_eq!(db.lookup(0, "type"), Some("uuid"));
        assert!(db.flag("primary_key"));
        assert_eq!(db.num_args(), 2);
        assert_eq!(id.attribute("ui").unwrap().lookup(0, "order"), Some("1"));
    }

    #[test]
    fn test_optional_fields_and_json() {
        let v = eval(&[(
            "x.cue",
            "payload: {\n\tname: \"x\"\n\tcount: 3\n\topt?: string\n\tflag: *true | false\n}\n",
        )])
        .unwrap();
        let payload = v.lookup("payload").unwrap();
        assert!(payload.field("opt").unwrap().is_optional());
        assert_eq!(
            payload.to_json(),
            serde_json::json!({"name": "x", "count": 3, "flag": true})
        );
    }

    #[test]
    fn test_disjunction_kinds_and_options() {
        let v = eval(&[("x.cue", "status: \"draft\" | \"paid\" | \"shipped\"\n")]).unwrap();
        let status = v.lookup("status").unwrap();
        assert_eq!(status.kind(), ValueKind::String);
        assert_eq!(status.string_options(), vec!["draft", "paid", "shipped"]);
        assert!(!status.is_concrete());
    }

    #[test]
    fn test_package_mismatch() {
        let err = eval(&[("a.cue", "package a\n"), ("b.cue", "package b\n")]).unwrap_err();
        assert!(matches!(err, CueError::PackageMismatch { .. }));
    }

    #[test]
    fn test_unresolved_import_reference() {
        let v = eval(&[("x.cue", "import \"time\"\ncreated: time.Time\n")]).unwrap();
        assert_eq!(v.lookup("created").and_then(Value::reference), Some("time.Time"));
    }
}
