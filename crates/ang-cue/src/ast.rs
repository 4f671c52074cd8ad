//! Syntax tree for the CUE subset
//!
//! The tree keeps everything the formatter needs to reproduce a file:
//! leading comment groups, blank-line separators, same-line trailing
//! comments and the shorthand `a: b: c` form. Values are not evaluated
//! here; see [`crate::value`] for unification.

use serde::{Deserialize, Serialize};

/// Byte range in the originating file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// One parsed `.cue` file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct File {
    pub filename: String,
    /// Comments above the `package` clause
    pub header: Vec<Trivia>,
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub decls: Vec<Decl>,
    /// Comments after the last declaration
    pub trailing: Vec<Trivia>,
    /// Byte offset of every line start, for offset to line/column mapping
    pub line_starts: Vec<usize>,
}

impl File {
    /// Convert a byte offset into a 1-based (line, column) pair
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        line_col(&self.line_starts, offset)
    }
}

pub(crate) fn line_starts(src: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(src.match_indices('\n').map(|(i, _)| i + 1));
    starts
}

pub(crate) fn line_col(starts: &[usize], offset: usize) -> (u32, u32) {
    let line_idx = match starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    };
    let col = offset - starts.get(line_idx).copied().unwrap_or(0);
    (line_idx as u32 + 1, col as u32 + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub alias: Option<String>,
    pub path: String,
}

/// Comment or blank-line marker attached in front of a declaration
#[derive(Debug, Clone, PartialEq)]
pub enum Trivia {
    /// Comment text including the leading `//`
    Comment(String),
    Blank,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub kind: DeclKind,
    pub leading: Vec<Trivia>,
    pub trailing_comment: Option<String>,
    pub span: Span,
}

impl Decl {
    pub fn new(kind: DeclKind) -> Self {
        Self {
            kind,
            leading: Vec::new(),
            trailing_comment: None,
            span: Span::default(),
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match &self.kind {
            DeclKind::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_field_mut(&mut self) -> Option<&mut Field> {
        match &mut self.kind {
            DeclKind::Field(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Field(Field),
    /// Bare expression inside a struct, unified into the enclosing struct
    Embed(Expr),
    Let { name: String, value: Expr },
    /// Declaration attribute such as `@owner(auth)` inside a struct body
    Attribute(Attribute),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub label: Label,
    pub optional: Optionality,
    pub value: Expr,
    pub attrs: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Ident(String),
    Quoted(String),
    Pattern(Box<Expr>),
}

impl Label {
    /// Label text as used for lookups; pattern labels have none
    pub fn name(&self) -> Option<&str> {
        match self {
            Label::Ident(s) | Label::Quoted(s) => Some(s),
            Label::Pattern(_) => None,
        }
    }

    pub fn is_definition(&self) -> bool {
        matches!(self, Label::Ident(s) if s.starts_with('#') || s.starts_with("_#"))
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self, Label::Ident(s) if s.starts_with('_'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Optionality {
    #[default]
    Regular,
    /// `label?:`
    Optional,
    /// `label!:`
    Required,
}

impl Optionality {
    pub fn sigil(self) -> &'static str {
        match self {
            Optionality::Regular => "",
            Optionality::Optional => "?",
            Optionality::Required => "!",
        }
    }
}

/// `@name(body)`; the body is kept raw and split on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Expression without position, used when synthesizing nodes
    pub fn synthetic(kind: ExprKind) -> Self {
        Self {
            kind,
            span: Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Struct(StructLit),
    List(ListLit),
    Str { value: String, multiline: bool },
    /// Numeric literal kept in source form
    Number(String),
    Bool(bool),
    Null,
    /// `_`
    Top,
    /// `_|_`
    Bottom,
    Ident(String),
    Selector(Box<Expr>, String),
    Call { func: Box<Expr>, args: Vec<Expr> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// `*expr` inside a disjunction
    Default(Box<Expr>),
    Paren(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructLit {
    pub decls: Vec<Decl>,
    /// Comments between the last declaration and the closing brace
    pub closing: Vec<Trivia>,
    /// Written as `a: b: c` without braces
    pub shorthand: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListLit {
    pub elems: Vec<Expr>,
    /// `...T`; `...` alone stores `_`
    pub rest: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Ge,
    Gt,
    Le,
    Lt,
    Ne,
    Match,
    NotMatch,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::Ge => ">=",
            UnaryOp::Gt => ">",
            UnaryOp::Le => "<=",
            UnaryOp::Lt => "<",
            UnaryOp::Ne => "!=",
            UnaryOp::Match => "=~",
            UnaryOp::NotMatch => "!~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Disjunction
    Or,
    /// Unification
    And,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "|",
            BinaryOp::And => "&",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col_mapping() {
        let starts = line_starts("ab\ncd\n\nef");
        assert_eq!(line_col(&starts, 0), (1, 1));
        assert_eq!(line_col(&starts, 1), (1, 2));
        assert_eq!(line_col(&starts, 3), (2, 1));
        assert_eq!(line_col(&starts, 6), (3, 1));
        assert_eq!(line_col(&starts, 8), (4, 2));
    }

    #[test]
    fn test_label_kinds() {
        assert!(Label::Ident("#User".into()).is_definition());
        assert!(Label::Ident("_#Hidden".into()).is_definition());
        assert!(Label::Ident("_dto".into()).is_hidden());
        assert!(!Label::Quoted("#x".into()).is_definition());
        assert_eq!(Label::Quoted("a-b".into()).name(), Some("a-b"));
    }
}
