//! Canonical formatter
//!
//! Output uses tab indentation, one declaration per line, and keeps leading
//! comment groups, single blank-line separators and trailing comments from the
//! syntax tree. Formatting a formatted file is a no-op.

use crate::ast::*;

/// Render a whole file in canonical form, ending with a single newline
pub fn format_file(file: &File) -> String {
    let mut p = Printer::default();
    p.trivia(&file.header, 0, true);
    if let Some(pkg) = &file.package {
        p.line(0, &format!("package {pkg}"));
    }
    if !file.imports.is_empty() {
        p.blank();
        if let [single] = file.imports.as_slice() {
            p.line(0, &format!("import {}", import_text(single)));
        } else {
            p.line(0, "import (");
            for imp in &file.imports {
                p.line(1, &import_text(imp));
            }
            p.line(0, ")");
        }
    }
    if !file.decls.is_empty() {
        p.blank();
        p.decls(&file.decls, 0);
    }
    p.trivia(&file.trailing, 0, false);

    let body = p.out.trim_end();
    if body.is_empty() {
        String::new()
    } else {
        format!("{body}\n")
    }
}

/// Single expression rendered at indentation zero
pub fn expr_to_string(expr: &Expr) -> String {
    Printer::default().expr(expr, 0)
}

/// Double-quoted CUE string literal
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn import_text(imp: &Import) -> String {
    match &imp.alias {
        Some(alias) => format!("{alias} {}", quote(&imp.path)),
        None => quote(&imp.path),
    }
}

fn tabs(n: usize) -> String {
    "\t".repeat(n)
}

fn is_simple(expr: &Expr) -> bool {
    !matches!(
        expr.kind,
        ExprKind::Struct(_) | ExprKind::List(_) | ExprKind::Str { multiline: true, .. }
    )
}

#[derive(Default)]
struct Printer {
    out: String,
}

impl Printer {
    fn line(&mut self, indent: usize, text: &str) {
        self.out.push_str(&tabs(indent));
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn trivia(&mut self, items: &[Trivia], indent: usize, first: bool) {
        let mut at_start = first;
        for t in items {
            match t {
                Trivia::Blank if !at_start => self.blank(),
                Trivia::Blank => {}
                Trivia::Comment(c) => {
                    self.line(indent, c);
                    at_start = false;
                }
            }
        }
    }

    fn decls(&mut self, decls: &[Decl], indent: usize) {
        for (idx, decl) in decls.iter().enumerate() {
            self.trivia(&decl.leading, indent, idx == 0);
            let mut text = self.decl_text(decl, indent);
            if let Some(c) = &decl.trailing_comment {
                text.push(' ');
                text.push_str(c);
            }
            self.line(indent, &text);
        }
    }

    fn decl_text(&self, decl: &Decl, indent: usize) -> String {
        match &decl.kind {
            DeclKind::Field(field) => self.field_text(field, indent),
            DeclKind::Embed(expr) => self.expr(expr, indent),
            DeclKind::Let { name, value } => format!("let {name} = {}", self.expr(value, indent)),
            DeclKind::Attribute(attr) => attr_text(attr),
        }
    }

    fn field_text(&self, field: &Field, indent: usize) -> String {
        let mut s = format!(
            "{}{}: {}",
            self.label(&field.label),
            field.optional.sigil(),
            self.expr(&field.value, indent)
        );
        for attr in &field.attrs {
            s.push(' ');
            s.push_str(&attr_text(attr));
        }
        s
    }

    fn label(&self, label: &Label) -> String {
        match label {
            Label::Ident(s) => s.clone(),
            Label::Quoted(s) => quote(s),
            Label::Pattern(e) => format!("[{}]", self.expr(e, 0)),
        }
    }

    fn expr(&self, expr: &Expr, indent: usize) -> String {
        match &expr.kind {
            ExprKind::Struct(lit) => self.struct_lit(lit, indent),
            ExprKind::List(lit) => self.list_lit(lit, indent),
            ExprKind::Str {
                value,
                multiline: true,
            } => {
                let inner = tabs(indent + 1);
                let mut s = String::from("\"\"\"\n");
                for line in value.split('\n') {
                    if !line.is_empty() {
                        s.push_str(&inner);
                        s.push_str(&line.replace('\\', "\\\\"));
                    }
                    s.push('\n');
                }
                s.push_str(&inner);
                s.push_str("\"\"\"");
                s
            }
            ExprKind::Str { value, .. } => quote(value),
            ExprKind::Number(raw) => raw.clone(),
            ExprKind::Bool(b) => b.to_string(),
            ExprKind::Null => "null".to_string(),
            ExprKind::Top => "_".to_string(),
            ExprKind::Bottom => "_|_".to_string(),
            ExprKind::Ident(name) => name.clone(),
            ExprKind::Selector(base, sel) => format!("{}.{sel}", self.expr(base, indent)),
            ExprKind::Call { func, args } => {
                let args: Vec<String> = args.iter().map(|a| self.expr(a, indent)).collect();
                format!("{}({})", self.expr(func, indent), args.join(", "))
            }
            ExprKind::Unary { op, expr } => format!("{}{}", op.symbol(), self.expr(expr, indent)),
            ExprKind::Binary { op, lhs, rhs } => format!(
                "{} {} {}",
                self.expr(lhs, indent),
                op.symbol(),
                self.expr(rhs, indent)
            ),
            ExprKind::Default(inner) => format!("*{}", self.expr(inner, indent)),
            ExprKind::Paren(inner) => format!("({})", self.expr(inner, indent)),
        }
    }

    fn struct_lit(&self, lit: &StructLit, indent: usize) -> String {
        if lit.shorthand && lit.closing.is_empty() {
            if let [decl] = lit.decls.as_slice() {
                if let (DeclKind::Field(field), true, None) =
                    (&decl.kind, decl.leading.is_empty(), &decl.trailing_comment)
                {
                    return self.field_text(field, indent);
                }
            }
        }
        if lit.decls.is_empty() && lit.closing.is_empty() {
            return "{}".to_string();
        }
        let mut inner = Printer::default();
        inner.decls(&lit.decls, indent + 1);
        inner.trivia(&lit.closing, indent + 1, lit.decls.is_empty());
        format!("{{\n{}{}}}", inner.out, tabs(indent))
    }

    fn list_lit(&self, lit: &ListLit, indent: usize) -> String {
        let simple = lit.elems.iter().all(is_simple) && lit.rest.as_deref().map_or(true, is_simple);
        if simple {
            let mut parts: Vec<String> = lit.elems.iter().map(|e| self.expr(e, indent)).collect();
            if let Some(rest) = &lit.rest {
                parts.push(self.rest_text(rest, indent));
            }
            let inline = format!("[{}]", parts.join(", "));
            if inline.len() <= 80 {
                return inline;
            }
        }
        let inner = tabs(indent + 1);
        let mut s = String::from("[\n");
        for elem in &lit.elems {
            s.push_str(&inner);
            s.push_str(&self.expr(elem, indent + 1));
            s.push_str(",\n");
        }
        if let Some(rest) = &lit.rest {
            s.push_str(&inner);
            s.push_str(&self.rest_text(rest, indent + 1));
            s.push('\n');
        }
        s.push_str(&tabs(indent));
        s.push(']');
        s
    }

    fn rest_text(&self, rest: &Expr, indent: usize) -> String {
        match rest.kind {
            ExprKind::Top => "...".to_string(),
            _ => format!("...{}", self.expr(rest, indent)),
        }
    }
}

fn attr_text(attr: &Attribute) -> String {
    format!("@{}({})", attr.name, attr.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn roundtrip(src: &str) -> String {
        format_file(&parse_file("x.cue", src).unwrap())
    }

    #[test]
    fn test_format_normalizes_spacing() {
        let src = "package domain\n#User:{\n  id:   string  @db(type=uuid)\n  tags: [ \"a\",\"b\" ]\n}\n";
        let expected = "package domain\n\n#User: {\n\tid: string @db(type=uuid)\n\ttags: [\"a\", \"b\"]\n}\n";
        assert_eq!(roundtrip(src), expected);
    }

    #[test]
    fn test_format_keeps_comments_and_blank_lines() {
        let src = "package x\n\n// Order aggregate\n#Order: {\n\t// primary key\n\tid: string // uuid\n\n\ttotal: int\n\t// end of fields\n}\n";
        assert_eq!(roundtrip(src), src);
    }

    #[test]
    fn test_format_shorthand_and_lists_of_structs() {
        let src = "a: b: c: 1\nitems: [{\n\tname: \"x\"\n}]\n";
        let expected = "a: b: c: 1\nitems: [\n\t{\n\t\tname: \"x\"\n\t},\n]\n";
        assert_eq!(roundtrip(src), expected);
    }

    #[test]
    fn test_format_multiline_string() {
        let src = "sql: \"\"\"\n\tSELECT *\n\tFROM users\n\t\"\"\"\n";
        assert_eq!(roundtrip(src), src);
    }

    #[test]
    fn test_format_imports_block() {
        let src = "package x\nimport (\n\"strings\"\nl \"list\"\n)\na: 1\n";
        let expected = "package x\n\nimport (\n\t\"strings\"\n\tl \"list\"\n)\n\na: 1\n";
        assert_eq!(roundtrip(src), expected);
    }

    #[test]
    fn test_format_empty_file() {
        assert_eq!(roundtrip(""), "");
    }

    fn label_strategy() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,6}".prop_filter("keyword", |s| {
            !["let", "if", "for", "in", "import", "package", "true", "false", "null"].contains(&s.as_str())
        })
    }

    fn scalar_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            any::<u16>().prop_map(|n| n.to_string()),
            "[a-zA-Z0-9 ]{0,8}".prop_map(|s| quote(&s)),
            Just("string".to_string()),
            Just("*\"GET\" | \"POST\"".to_string()),
            Just("int & >=0".to_string()),
            Just("[...string]".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn test_format_is_idempotent(
            fields in prop::collection::vec((label_strategy(), scalar_strategy(), any::<bool>()), 1..8)
        ) {
            let mut src = String::from("package gen\n\n#Gen: {\n");
            for (label, value, comment) in &fields {
                if *comment {
                    src.push_str("\t// note\n");
                }
                src.push_str(&format!("\t{label}: {value}\n"));
            }
            src.push_str("}\n");
            let once = roundtrip(&src);
            let twice = roundtrip(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
