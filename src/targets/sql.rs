//! PostgreSQL DDL for repository-backed entities

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde_json::Value;

use crate::ir::{Entity, Field, Schema, TypeRef};
use crate::render::snake_case;

pub fn table_name(entity: &str) -> String {
    let base = snake_case(entity);
    if base.ends_with('s') || base.ends_with('x') || base.ends_with("ch") || base.ends_with("sh") {
        format!("{base}es")
    } else if base.ends_with('y') && !base.ends_with("ay") && !base.ends_with("ey") && !base.ends_with("oy") {
        format!("{}ies", &base[..base.len() - 1])
    } else {
        format!("{base}s")
    }
}

fn column_type(f: &Field) -> String {
    if let Some(t) = f.metadata.get("sql_type").and_then(Value::as_str) {
        if !t.trim().is_empty() && t != "TEXT" {
            return t.to_string();
        }
    }
    match &f.type_ref {
        TypeRef::String | TypeRef::Enum | TypeRef::File => "TEXT",
        TypeRef::Int => "INTEGER",
        TypeRef::Int64 => "BIGINT",
        TypeRef::Float => "DOUBLE PRECISION",
        TypeRef::Bool => "BOOLEAN",
        TypeRef::Time => "TIMESTAMPTZ",
        TypeRef::Uuid => "UUID",
        TypeRef::Json | TypeRef::Any | TypeRef::Entity { .. } | TypeRef::List { .. } | TypeRef::Map { .. } => "JSONB",
    }
    .to_string()
}

fn flag(f: &Field, key: &str) -> bool {
    f.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn create_table(entity: &Entity) -> String {
    let table = table_name(&entity.name);
    let columns: Vec<&Field> = entity.fields.iter().filter(|f| !f.skip_domain).collect();
    let explicit_pk = columns.iter().any(|f| flag(f, "primary_key"));

    let mut lines = Vec::new();
    for f in &columns {
        let mut line = format!("    {} {}", snake_case(&f.name), column_type(f));
        let pk = flag(f, "primary_key") || (!explicit_pk && f.name.eq_ignore_ascii_case("id"));
        if pk {
            line.push_str(" PRIMARY KEY");
        } else {
            if f.is_required() {
                line.push_str(" NOT NULL");
            }
            if flag(f, "unique") {
                line.push_str(" UNIQUE");
            }
        }
        lines.push(line);
    }

    let mut out = format!("CREATE TABLE IF NOT EXISTS {table} (\n{}\n);\n", lines.join(",\n"));

    let mut index_names = BTreeSet::new();
    for f in columns.iter().filter(|f| flag(f, "index")) {
        let col = snake_case(&f.name);
        let name = format!("idx_{table}_{col}");
        if index_names.insert(name.clone()) {
            let _ = writeln!(out, "CREATE INDEX IF NOT EXISTS {name} ON {table} ({col});");
        }
    }
    for idx in &entity.indexes {
        let cols: Vec<String> = idx.fields.iter().map(|c| snake_case(c)).collect();
        if cols.is_empty() {
            continue;
        }
        let name = if idx.name.is_empty() {
            format!("idx_{table}_{}", cols.join("_"))
        } else {
            idx.name.clone()
        };
        if !index_names.insert(name.clone()) {
            continue;
        }
        let unique = if idx.unique { "UNIQUE " } else { "" };
        let _ = writeln!(out, "CREATE {unique}INDEX IF NOT EXISTS {name} ON {table} ({});", cols.join(", "));
    }
    out
}

/// Tables for every entity owned by a repository, in entity declaration order.
/// `None` when no repository names a declared entity.
pub fn build_schema_sql(schema: &Schema) -> Option<String> {
    let owned: BTreeSet<&str> = schema.repos.iter().map(|r| r.entity.as_str()).collect();
    let tables: Vec<String> = schema
        .entities
        .iter()
        .filter(|e| owned.contains(e.name.as_str()))
        .map(create_table)
        .collect();
    if tables.is_empty() {
        return None;
    }
    Some(format!("-- Code generated by ang. DO NOT EDIT.\n\n{}", tables.join("\n")))
}
