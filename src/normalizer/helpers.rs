//! Value readers and type inference shared by the extractors

use std::collections::BTreeMap;

use ang_cue::{Node, Value, ValueKind};

use super::types::Attribute;

pub use crate::render::snake_case;

/// Strip optional/required sigils from a label
pub fn clean_name(s: &str) -> String {
    s.trim_end_matches('?').trim_end_matches('!').trim().to_string()
}

/// `file:line` of a value, or empty when it has no position
pub fn format_pos(v: &Value) -> String {
    let pos = v.pos();
    if pos.is_valid() {
        format!("{}:{}", pos.file, pos.line)
    } else {
        String::new()
    }
}

/// Trimmed concrete string at `path`, empty when missing or not a string
pub fn get_string(v: &Value, path: &str) -> String {
    v.lookup(path)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

pub fn get_string_or(v: &Value, path: &str, default: &str) -> String {
    match v.lookup(path).and_then(Value::as_str) {
        Some(s) => s.trim().to_string(),
        None => default.to_string(),
    }
}

pub fn get_bool(v: &Value, path: &str) -> Option<bool> {
    v.lookup(path).and_then(Value::as_bool)
}

pub fn get_int(v: &Value, path: &str) -> Option<i64> {
    v.lookup(path).and_then(Value::as_int)
}

/// Trimmed non-empty strings of a list, or of a single string value
pub fn string_list(v: Option<&Value>) -> Vec<String> {
    let Some(v) = v else {
        return Vec::new();
    };
    if let Some(items) = v.list() {
        return items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    match v.as_str().map(str::trim) {
        Some(s) if !s.is_empty() => vec![s.to_string()],
        _ => Vec::new(),
    }
}

pub fn export_name(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn is_exported_name(s: &str) -> bool {
    s.chars().next().is_some_and(char::is_uppercase)
}

/// Parse sizes like `1mb`, `512kb` into bytes; unparsable input yields 0
pub fn parse_size(s: &str) -> i64 {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        return 0;
    }
    let (num, multiplier) = if let Some(n) = s.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('b') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };
    let digits: String = num.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<i64>().unwrap_or(0) * multiplier
}

/// Attributes as records; positional arguments are stored under `_`
pub fn parse_attributes(v: &Value) -> Vec<Attribute> {
    v.attributes()
        .into_iter()
        .map(|attr| {
            let mut args = BTreeMap::new();
            for arg in attr.args() {
                if arg.key.is_empty() {
                    args.insert("_".to_string(), arg.value.clone());
                } else {
                    args.insert(arg.key.clone(), arg.value.clone());
                }
            }
            Attribute {
                name: attr.name.clone(),
                args,
            }
        })
        .collect()
}

/// Whether `@name(...)` carries `key` as a bare flag or as `key=...`
pub fn attr_has(attr: &ang_cue::Attr, key: &str) -> bool {
    attr.args()
        .iter()
        .any(|a| a.key == key || (a.key.is_empty() && a.value == key))
}

// ============================================================================
// Type inference
// ============================================================================

/// Entity name from a reference path such as `#User` or `domain.#User`
fn entity_from_reference(reference: &str, field_name: &str) -> Option<String> {
    let selectors: Vec<&str> = reference.split('.').filter(|s| !s.is_empty()).collect();
    let last = *selectors.last()?;
    if let Some(name) = last.strip_prefix('#') {
        return Some(export_name(name));
    }
    if selectors.len() == 1 && field_name.eq_ignore_ascii_case("data") && is_exported_name(last) {
        return Some(export_name(last));
    }
    if selectors.len() >= 2 && selectors[selectors.len() - 2] == "domain" {
        return Some(export_name(last));
    }
    None
}

/// Map a declared type name (`email`, `int64`, `[]uuid`, `"a" | "b"`) to the
/// neutral vocabulary; empty when unknown
pub fn map_declared_type(raw: &str) -> String {
    let t = raw.trim().trim_matches('"').trim_start_matches('*').trim();
    if t.is_empty() {
        return String::new();
    }
    if t.contains('|') {
        return "string".to_string();
    }
    if let Some(item) = t.strip_prefix("[]") {
        let mapped = map_declared_type(item);
        if mapped.is_empty() {
            return "[]any".to_string();
        }
        return format!("[]{}", mapped.trim_start_matches("[]"));
    }
    match t.to_lowercase().as_str() {
        "string" | "email" | "url" | "phone" | "password" | "uuid" => "string",
        "int" | "int32" => "int",
        "int64" | "money" => "int64",
        "float" | "float32" | "float64" | "number" => "float",
        "bool" | "boolean" => "bool",
        "time" | "time.time" | "datetime" => "time",
        "json" | "object" | "map" => "json",
        _ => "",
    }
    .to_string()
}

/// Infer the neutral type of a field value
pub fn detect_type(field_name: &str, v: &Value) -> String {
    let kind = v.kind();

    if kind == ValueKind::Struct {
        if let Some(declared) = v.lookup("type").and_then(Value::as_str) {
            let mapped = map_declared_type(declared);
            if !mapped.is_empty() {
                return mapped;
            }
        }
    }

    if field_name == "permissions" {
        return "[]string".to_string();
    }

    if kind == ValueKind::Struct {
        if let Some(name) = v.reference().and_then(|r| entity_from_reference(r, field_name)) {
            return format!("domain.{name}");
        }
    }

    match kind {
        ValueKind::String => "string".to_string(),
        ValueKind::Int => "int".to_string(),
        ValueKind::Float | ValueKind::Number => "float".to_string(),
        ValueKind::Bool => "bool".to_string(),
        ValueKind::List => detect_list_type(field_name, v),
        ValueKind::Struct => "json".to_string(),
        _ => "any".to_string(),
    }
}

fn detect_list_type(field_name: &str, v: &Value) -> String {
    if let Some(elem) = v.list_rest() {
        if elem.kind() == ValueKind::Struct {
            if let Some(name) = elem.reference().and_then(|r| entity_from_reference(r, field_name)) {
                return format!("[]domain.{name}");
            }
        }
        match elem.kind() {
            ValueKind::String => return "[]string".to_string(),
            ValueKind::Int => return "[]int".to_string(),
            ValueKind::Float | ValueKind::Number => return "[]float".to_string(),
            ValueKind::Bool => return "[]bool".to_string(),
            _ => {}
        }
        if let Node::Ref(r) = elem.node() {
            if let Some(name) = entity_from_reference(r, field_name) {
                return format!("[]domain.{name}");
            }
        }
    }
    if let Some(items) = v.list() {
        if !items.is_empty() && items.iter().all(|i| i.kind() == ValueKind::String) {
            return "[]string".to_string();
        }
    }
    "[]any".to_string()
}

/// Inline struct element of an open list (`[...{...}]`) that is not a reference
pub fn inline_list_elem(v: &Value) -> Option<&Value> {
    let elem = v.list_rest()?;
    (elem.kind() == ValueKind::Struct && elem.reference().is_none()).then_some(elem)
}

/// Concrete scalar default rendered as text (`"x"` becomes `x`)
pub fn scalar_default(v: &Value) -> String {
    let d = v.default_value();
    match d.node() {
        Node::Str(s) => s.clone(),
        Node::Int(_) | Node::Float(_) | Node::Bool(_) | Node::Null => d.to_cue_string(),
        _ => String::new(),
    }
}

/// Split a `file:line` source string; the line is 0 when absent
pub fn split_source(source: &str) -> (String, u32) {
    match source.rsplit_once(':') {
        Some((file, line)) => match line.parse() {
            Ok(n) => (file.to_string(), n),
            Err(_) => (source.to_string(), 0),
        },
        None => (source.to_string(), 0),
    }
}
