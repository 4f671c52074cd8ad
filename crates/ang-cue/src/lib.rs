//! ang-cue: embedded CUE subset for the ANG compiler
//!
//! This crate contains the configuration-language layer with no knowledge of
//! ANG's domain:
//! - Syntax tree with comment and blank-line trivia
//! - nom-based parser with positioned errors
//! - Package unification (struct merge, type/bound checks, defaults, references)
//! - Value inspection (lookup, fields, attributes, JSON export)
//! - Canonical formatter used by the structural merge engine

pub mod ast;
pub mod error;
pub mod format;
pub mod parser;
pub mod value;

pub use ast::{Decl, DeclKind, Expr, ExprKind, Field, File, Label, Optionality, StructLit, Trivia};
pub use error::CueError;
pub use format::format_file;
pub use parser::{parse_expr, parse_file};
pub use value::{evaluate, Attr, FieldValue, Node, Pos, Value, ValueKind};

/// Parse every `(filename, source)` pair and unify them as one package
pub fn load_package(sources: &[(String, String)]) -> Result<Value, CueError> {
    let files = sources
        .iter()
        .map(|(name, src)| parse_file(name, src))
        .collect::<Result<Vec<_>, _>>()?;
    evaluate(&files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_package_roundtrip() {
        let sources = vec![
            (
                "cue/domain/user.cue".to_string(),
                "package domain\n\n#User: {\n\tid: string\n}\n".to_string(),
            ),
            (
                "cue/domain/order.cue".to_string(),
                "package domain\n\n#Order: {\n\tuser: #User\n}\n".to_string(),
            ),
        ];
        let value = load_package(&sources).unwrap();
        let order = value.lookup("#Order.user").unwrap();
        assert_eq!(order.reference(), Some("#User"));
        assert_eq!(order.pos().file, "cue/domain/order.cue");
        assert_eq!(order.pos().line, 4);
    }

    #[test]
    fn test_load_package_syntax_error() {
        let sources = vec![("cue/api/bad.cue".to_string(), "a: {\n".to_string())];
        let err = load_package(&sources).unwrap_err();
        assert_eq!(err.location().map(|(f, _, _)| f), Some("cue/api/bad.cue".to_string()));
    }
}
