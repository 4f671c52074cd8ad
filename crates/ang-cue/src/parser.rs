//! nom parser for the CUE subset
//!
//! ```text
//! file    = trivia [package] {import} decls
//! decl    = attribute | "let" ident "=" expr | label [?!] ":" value {attribute} | expr
//! value   = decl-head value (shorthand) | expr
//! expr    = conj {"|" conj}
//! conj    = unary {"&" unary}
//! unary   = (">=" | "<=" | "!=" | "=~" | "!~" | ">" | "<" | "!" | "-" | "*") unary | postfix
//! postfix = primary {"." ident | "(" args ")"}
//! ```
//!
//! Newlines separate declarations; commas are optional. Comments and blank
//! lines in front of a declaration are kept as [`Trivia`] so the formatter
//! can reproduce them.

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_until, take_while, take_while1},
    character::complete::{
        char, digit1, line_ending, none_of, not_line_ending, one_of, space0, space1,
    },
    combinator::{cut, map, opt, recognize, value},
    error::{context, VerboseError, VerboseErrorKind},
    multi::many0,
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::CueError;

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

// ============================================================================
// Public API
// ============================================================================

/// Parse one `.cue` file, keeping comments and blank-line structure
pub fn parse_file(filename: &str, src: &str) -> Result<File, CueError> {
    let parser = Parser { src };
    match parser.file(src) {
        Ok((rest, mut file)) => {
            if !rest.trim().is_empty() {
                return Err(parser.error_at(filename, rest, "unexpected input".to_string()));
            }
            file.filename = filename.to_string();
            file.line_starts = line_starts(src);
            Ok(file)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(parser.syntax_error(filename, &e))
        }
        Err(nom::Err::Incomplete(_)) => Err(CueError::Syntax {
            file: filename.to_string(),
            line: 1,
            column: 1,
            message: "incomplete input".to_string(),
        }),
    }
}

/// Parse a standalone expression such as `int & >=0`
pub fn parse_expr(src: &str) -> Result<Expr, CueError> {
    let parser = Parser { src };
    let res = parser.ws(src).and_then(|(i, _)| parser.expr(i));
    match res {
        Ok((rest, expr)) if rest.trim().is_empty() => Ok(expr),
        Ok((rest, _)) => Err(parser.error_at("<expr>", rest, "unexpected input".to_string())),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(parser.syntax_error("<expr>", &e))
        }
        Err(nom::Err::Incomplete(_)) => Err(parser.error_at("<expr>", src, "incomplete input".into())),
    }
}

// ============================================================================
// Lexical helpers
// ============================================================================

fn comment(i: &str) -> PResult<'_, &str> {
    recognize(pair(tag("//"), not_line_ending))(i)
}

/// Whitespace, newlines and comments; blank lines collapse to one marker
fn trivia(i: &str) -> PResult<'_, Vec<Trivia>> {
    let mut out = Vec::new();
    let mut rest = i;
    let mut newlines = 0usize;
    loop {
        let (r, _) = space0(rest)?;
        rest = r;
        if let Ok((r, _)) = line_ending::<&str, VerboseError<&str>>(rest) {
            newlines += 1;
            if newlines == 2 {
                out.push(Trivia::Blank);
            }
            rest = r;
            continue;
        }
        if let Ok((r, c)) = comment(rest) {
            out.push(Trivia::Comment(c.trim_end().to_string()));
            newlines = 0;
            rest = r;
            continue;
        }
        return Ok((rest, out));
    }
}

fn identifier(i: &str) -> PResult<'_, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '#' || c == '$'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
    ))(i)
}

fn escape_char(i: &str) -> PResult<'_, char> {
    alt((
        value('\n', char('n')),
        value('\r', char('r')),
        value('\t', char('t')),
        value('\\', char('\\')),
        value('"', char('"')),
        value('\'', char('\'')),
        value('/', char('/')),
    ))(i)
}

fn quoted_string(i: &str) -> PResult<'_, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(none_of("\"\\\n"), '\\', escape_char)),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(i)
}

fn single_quoted_string(i: &str) -> PResult<'_, String> {
    delimited(
        char('\''),
        map(
            opt(escaped_transform(none_of("'\\\n"), '\\', escape_char)),
            Option::unwrap_or_default,
        ),
        char('\''),
    )(i)
}

fn raw_string(i: &str) -> PResult<'_, String> {
    map(
        delimited(tag("#\""), take_until("\"#"), tag("\"#")),
        |s: &str| s.to_string(),
    )(i)
}

fn multiline_string(i: &str) -> PResult<'_, String> {
    let (i, _) = tag("\"\"\"")(i)?;
    let (i, body) = cut(context("closing \"\"\"", take_until("\"\"\"")))(i)?;
    let (i, _) = tag("\"\"\"")(i)?;
    Ok((i, unescape(&dedent_multiline(body))))
}

/// Strip the first newline and the closing line's indentation from every line
fn dedent_multiline(body: &str) -> String {
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    let (content, indent) = match body.rfind('\n') {
        Some(idx) => (&body[..idx], &body[idx + 1..]),
        None => ("", body),
    };
    content
        .lines()
        .map(|l| l.strip_prefix(indent).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn number(i: &str) -> PResult<'_, &str> {
    recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(i)
}

fn keyword_or_ident(i: &str) -> PResult<'_, ExprKind> {
    map(identifier, |name: &str| match name {
        "true" => ExprKind::Bool(true),
        "false" => ExprKind::Bool(false),
        "null" => ExprKind::Null,
        "_" => ExprKind::Top,
        other => ExprKind::Ident(other.to_string()),
    })(i)
}

fn unary_op(i: &str) -> PResult<'_, UnaryOp> {
    alt((
        value(UnaryOp::Ge, tag(">=")),
        value(UnaryOp::Le, tag("<=")),
        value(UnaryOp::Ne, tag("!=")),
        value(UnaryOp::Match, tag("=~")),
        value(UnaryOp::NotMatch, tag("!~")),
        value(UnaryOp::Gt, tag(">")),
        value(UnaryOp::Lt, tag("<")),
        value(UnaryOp::Not, tag("!")),
        value(UnaryOp::Neg, tag("-")),
    ))(i)
}

/// Attribute body up to the matching `)`, skipping quoted text
fn balanced_body(i: &str) -> PResult<'_, &str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, c) in i.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' if depth == 0 => return Ok((&i[idx..], &i[..idx])),
            ')' => depth -= 1,
            '\n' => break,
            _ => {}
        }
    }
    Err(nom::Err::Failure(VerboseError {
        errors: vec![(i, VerboseErrorKind::Context("attribute closing parenthesis"))],
    }))
}

fn attribute(i: &str) -> PResult<'_, Attribute> {
    let (i, _) = char('@')(i)?;
    let (i, name) = identifier(i)?;
    let (i, _) = char('(')(i)?;
    let (i, body) = balanced_body(i)?;
    let (i, _) = char(')')(i)?;
    Ok((
        i,
        Attribute {
            name: name.to_string(),
            body: body.trim().to_string(),
        },
    ))
}

fn import_spec(i: &str) -> PResult<'_, Import> {
    let (i, alias) = opt(terminated(identifier, space1))(i)?;
    let (i, path) = quoted_string(i)?;
    Ok((
        i,
        Import {
            alias: alias.map(str::to_string),
            path,
        },
    ))
}

// ============================================================================
// Grammar
// ============================================================================

struct Parser<'s> {
    src: &'s str,
}

impl<'s> Parser<'s> {
    fn offset(&self, i: &str) -> usize {
        self.src.len().saturating_sub(i.len())
    }

    fn span_from(&self, start: usize, rest: &str) -> Span {
        Span::new(start, self.offset(rest))
    }

    fn ws(&self, i: &'s str) -> PResult<'s, ()> {
        map(trivia, |_| ())(i)
    }

    fn file(&self, i: &'s str) -> PResult<'s, File> {
        let (i, mut header) = trivia(i)?;
        let (i, package) = opt(|i: &'s str| -> PResult<'s, String> {
            let (i, _) = tag("package")(i)?;
            let (i, _) = space1(i)?;
            let (i, name) = cut(context("package name", identifier))(i)?;
            Ok((i, name.to_string()))
        })(i)?;

        let mut pending = Vec::new();
        if package.is_none() {
            pending = std::mem::take(&mut header);
        }

        let mut imports = Vec::new();
        let mut i = i;
        loop {
            let (r, t) = trivia(i)?;
            match self.import_decl(r) {
                Ok((r, mut specs)) => {
                    imports.append(&mut specs);
                    i = r;
                }
                Err(nom::Err::Failure(e)) => return Err(nom::Err::Failure(e)),
                Err(_) => {
                    pending.extend(t);
                    i = r;
                    break;
                }
            }
        }
        while pending.first() == Some(&Trivia::Blank) {
            pending.remove(0);
        }

        let (i, (decls, trailing)) = self.decl_list(i, false, pending)?;
        Ok((
            i,
            File {
                filename: String::new(),
                header,
                package,
                imports,
                decls,
                trailing,
                line_starts: Vec::new(),
            },
        ))
    }

    fn import_decl(&self, i: &'s str) -> PResult<'s, Vec<Import>> {
        let (i, _) = tag("import")(i)?;
        let (i, _) = space0(i)?;
        alt((
            |i: &'s str| -> PResult<'s, Vec<Import>> {
                let (i, _) = char('(')(i)?;
                let (i, specs) = many0(delimited(trivia, import_spec, trivia))(i)?;
                let (i, _) = trivia(i)?;
                let (i, _) = cut(context("closing parenthesis", char(')')))(i)?;
                Ok((i, specs))
            },
            map(import_spec, |s| vec![s]),
        ))(i)
    }

    /// Declarations until end of input (file) or the closing brace (struct)
    fn decl_list(
        &self,
        mut i: &'s str,
        in_struct: bool,
        mut pending: Vec<Trivia>,
    ) -> PResult<'s, (Vec<Decl>, Vec<Trivia>)> {
        let mut decls = Vec::new();
        loop {
            let (r, t) = trivia(i)?;
            pending.extend(t);
            i = r;
            if i.is_empty() || (in_struct && i.starts_with('}')) {
                return Ok((i, (decls, pending)));
            }

            let (r, mut decl) = self.decl(i)?;
            decl.leading = std::mem::take(&mut pending);
            let (r, _) = space0(r)?;
            let (r, comma) = opt(char(','))(r)?;
            let (r, _) = space0(r)?;
            let (r, trailing) = opt(comment)(r)?;
            decl.trailing_comment = trailing.map(|c| c.trim_end().to_string());

            let separated = comma.is_some()
                || r.is_empty()
                || r.starts_with('\n')
                || r.starts_with("\r\n")
                || (in_struct && r.starts_with('}'));
            if !separated {
                return Err(nom::Err::Failure(VerboseError {
                    errors: vec![(r, VerboseErrorKind::Context("newline or comma after declaration"))],
                }));
            }
            decls.push(decl);
            i = r;
        }
    }

    fn decl(&self, i: &'s str) -> PResult<'s, Decl> {
        let start = self.offset(i);
        let (rest, kind) = alt((
            map(attribute, DeclKind::Attribute),
            |i: &'s str| self.let_clause(i),
            map(|i: &'s str| self.field(i), DeclKind::Field),
            map(|i: &'s str| self.expr(i), DeclKind::Embed),
        ))(i)?;
        let mut decl = Decl::new(kind);
        decl.span = self.span_from(start, rest);
        Ok((rest, decl))
    }

    fn let_clause(&self, i: &'s str) -> PResult<'s, DeclKind> {
        let (i, _) = tag("let")(i)?;
        let (i, _) = space1(i)?;
        let (i, name) = identifier(i)?;
        let (i, _) = space0(i)?;
        let (i, _) = char('=')(i)?;
        let (i, _) = space0(i)?;
        let (i, value) = cut(context("let value", |i: &'s str| self.expr(i)))(i)?;
        Ok((
            i,
            DeclKind::Let {
                name: name.to_string(),
                value,
            },
        ))
    }

    fn label(&self, i: &'s str) -> PResult<'s, Label> {
        alt((
            map(quoted_string, Label::Quoted),
            map(identifier, |s: &str| Label::Ident(s.to_string())),
            map(
                delimited(
                    pair(char('['), trivia),
                    |i: &'s str| self.expr(i),
                    pair(trivia, char(']')),
                ),
                |e| Label::Pattern(Box::new(e)),
            ),
        ))(i)
    }

    fn field_head(&self, i: &'s str) -> PResult<'s, (Label, Optionality)> {
        let (i, label) = self.label(i)?;
        let (i, sigil) = opt(one_of("?!"))(i)?;
        let (i, _) = space0(i)?;
        let (i, _) = char(':')(i)?;
        let optional = match sigil {
            Some('?') => Optionality::Optional,
            Some('!') => Optionality::Required,
            _ => Optionality::Regular,
        };
        Ok((i, (label, optional)))
    }

    fn field(&self, i: &'s str) -> PResult<'s, Field> {
        let (i, (label, optional)) = self.field_head(i)?;
        let (i, _) = space0(i)?;
        let (i, value) = cut(context("field value", |i: &'s str| self.field_value(i)))(i)?;
        let (i, attrs) = many0(|i: &'s str| {
            let (i, _) = space0(i)?;
            attribute(i)
        })(i)?;
        Ok((
            i,
            Field {
                label,
                optional,
                value,
                attrs,
            },
        ))
    }

    /// `a: b: c` nests a single-field struct without braces
    fn field_value(&self, i: &'s str) -> PResult<'s, Expr> {
        let start = self.offset(i);
        if self.field_head(i).is_ok() {
            let (rest, inner) = self.field(i)?;
            let span = self.span_from(start, rest);
            let mut decl = Decl::new(DeclKind::Field(inner));
            decl.span = span;
            let lit = StructLit {
                decls: vec![decl],
                closing: Vec::new(),
                shorthand: true,
            };
            return Ok((rest, Expr::new(ExprKind::Struct(lit), span)));
        }
        self.expr(i)
    }

    fn expr(&self, i: &'s str) -> PResult<'s, Expr> {
        self.binary(i, BinaryOp::Or)
    }

    /// `|` binds looser than `&`; an operator may end a line
    fn binary(&self, i: &'s str, op: BinaryOp) -> PResult<'s, Expr> {
        let start = self.offset(i);
        let operand = |i: &'s str| match op {
            BinaryOp::Or => self.binary(i, BinaryOp::And),
            BinaryOp::And => self.unary(i),
        };
        let symbol = match op {
            BinaryOp::Or => '|',
            BinaryOp::And => '&',
        };

        let (mut i, mut lhs) = operand(i)?;
        loop {
            let (r, _) = space0(i)?;
            let Some(after) = r.strip_prefix(symbol) else {
                break;
            };
            if after.starts_with(symbol) {
                break;
            }
            let (after, _) = self.ws(after)?;
            let (after, rhs) = cut(context("operand", operand))(after)?;
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                self.span_from(start, after),
            );
            i = after;
        }
        Ok((i, lhs))
    }

    fn unary(&self, i: &'s str) -> PResult<'s, Expr> {
        let start = self.offset(i);
        if let Some(r) = i.strip_prefix('*') {
            let (r, _) = space0(r)?;
            let (r, inner) = cut(context("default value", |i: &'s str| self.unary(i)))(r)?;
            return Ok((
                r,
                Expr::new(ExprKind::Default(Box::new(inner)), self.span_from(start, r)),
            ));
        }
        if let Ok((r, op)) = unary_op(i) {
            let (r, _) = space0(r)?;
            let (r, inner) = cut(context("operand", |i: &'s str| self.unary(i)))(r)?;
            return Ok((
                r,
                Expr::new(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(inner),
                    },
                    self.span_from(start, r),
                ),
            ));
        }
        self.postfix(i)
    }

    fn postfix(&self, i: &'s str) -> PResult<'s, Expr> {
        let start = self.offset(i);
        let (mut i, mut expr) = self.primary(i)?;
        loop {
            if let Some(r) = i.strip_prefix('.') {
                if let Ok((r, name)) = identifier(r) {
                    expr = Expr::new(
                        ExprKind::Selector(Box::new(expr), name.to_string()),
                        self.span_from(start, r),
                    );
                    i = r;
                    continue;
                }
                break;
            }
            if i.starts_with('(') {
                let (r, args) = self.call_args(i)?;
                expr = Expr::new(
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                    self.span_from(start, r),
                );
                i = r;
                continue;
            }
            break;
        }
        Ok((i, expr))
    }

    fn call_args(&self, i: &'s str) -> PResult<'s, Vec<Expr>> {
        let (mut i, _) = char('(')(i)?;
        let mut args = Vec::new();
        loop {
            let (r, _) = self.ws(i)?;
            if let Some(r) = r.strip_prefix(')') {
                return Ok((r, args));
            }
            let (r, arg) = cut(context("call argument", |i: &'s str| self.expr(i)))(r)?;
            args.push(arg);
            let (r, _) = self.ws(r)?;
            if let Some(r) = r.strip_prefix(',') {
                i = r;
                continue;
            }
            let (r, _) = cut(context("closing parenthesis", char(')')))(r)?;
            return Ok((r, args));
        }
    }

    fn primary(&self, i: &'s str) -> PResult<'s, Expr> {
        let start = self.offset(i);
        let (rest, kind) = alt((
            |i: &'s str| self.struct_lit(i),
            |i: &'s str| self.list_lit(i),
            map(multiline_string, |value| ExprKind::Str {
                value,
                multiline: true,
            }),
            map(raw_string, |value| ExprKind::Str {
                value,
                multiline: false,
            }),
            map(quoted_string, |value| ExprKind::Str {
                value,
                multiline: false,
            }),
            map(single_quoted_string, |value| ExprKind::Str {
                value,
                multiline: false,
            }),
            map(number, |n: &str| ExprKind::Number(n.to_string())),
            value(ExprKind::Bottom, tag("_|_")),
            keyword_or_ident,
            |i: &'s str| self.paren(i),
        ))(i)?;
        Ok((rest, Expr::new(kind, self.span_from(start, rest))))
    }

    fn paren(&self, i: &'s str) -> PResult<'s, ExprKind> {
        let (i, _) = char('(')(i)?;
        let (i, _) = self.ws(i)?;
        let (i, inner) = cut(context("expression", |i: &'s str| self.expr(i)))(i)?;
        let (i, _) = self.ws(i)?;
        let (i, _) = cut(context("closing parenthesis", char(')')))(i)?;
        Ok((i, ExprKind::Paren(Box::new(inner))))
    }

    fn struct_lit(&self, i: &'s str) -> PResult<'s, ExprKind> {
        let (i, _) = char('{')(i)?;
        let (i, (decls, mut closing)) = self.decl_list(i, true, Vec::new())?;
        let (i, _) = cut(context("closing brace", char('}')))(i)?;
        closing.retain(|t| matches!(t, Trivia::Comment(_)));
        Ok((
            i,
            ExprKind::Struct(StructLit {
                decls,
                closing,
                shorthand: false,
            }),
        ))
    }

    fn list_lit(&self, i: &'s str) -> PResult<'s, ExprKind> {
        let (mut i, _) = char('[')(i)?;
        let mut elems = Vec::new();
        loop {
            let (r, _) = self.ws(i)?;
            if let Some(r) = r.strip_prefix(']') {
                return Ok((r, ExprKind::List(ListLit { elems, rest: None })));
            }
            if let Some(r) = r.strip_prefix("...") {
                let (r, _) = space0(r)?;
                let at = self.offset(r);
                let (r, ty) = opt(|i: &'s str| self.expr(i))(r)?;
                let ty = ty.unwrap_or_else(|| Expr::new(ExprKind::Top, Span::new(at, at)));
                let (r, _) = self.ws(r)?;
                let (r, _) = opt(char(','))(r)?;
                let (r, _) = self.ws(r)?;
                let (r, _) = cut(context("closing bracket", char(']')))(r)?;
                return Ok((
                    r,
                    ExprKind::List(ListLit {
                        elems,
                        rest: Some(Box::new(ty)),
                    }),
                ));
            }
            let (r, elem) = cut(context("list element", |i: &'s str| self.expr(i)))(r)?;
            elems.push(elem);
            let (r, _) = self.ws(r)?;
            if let Some(r) = r.strip_prefix(',') {
                i = r;
                continue;
            }
            let (r, _) = cut(context("closing bracket", char(']')))(r)?;
            return Ok((r, ExprKind::List(ListLit { elems, rest: None })));
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    fn error_at(&self, filename: &str, rest: &str, message: String) -> CueError {
        let (line, column) = line_col(&line_starts(self.src), self.offset(rest));
        CueError::Syntax {
            file: filename.to_string(),
            line,
            column,
            message,
        }
    }

    fn syntax_error(&self, filename: &str, err: &VerboseError<&str>) -> CueError {
        let rest = err.errors.first().map(|(r, _)| *r).unwrap_or(self.src);
        let message = err
            .errors
            .iter()
            .find_map(|(_, kind)| match kind {
                VerboseErrorKind::Context(c) => Some(format!("expected {c}")),
                _ => None,
            })
            .or_else(|| {
                err.errors.first().map(|(_, kind)| match kind {
                    VerboseErrorKind::Char(c) => format!("expected '{c}'"),
                    VerboseErrorKind::Nom(k) => format!("unexpected input ({})", k.description()),
                    VerboseErrorKind::Context(c) => format!("expected {c}"),
                })
            })
            .unwrap_or_else(|| "invalid syntax".to_string());
        self.error_at(filename, rest, message)
    }
}
