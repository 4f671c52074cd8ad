//! OpenAPI 3 document built from the IR

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::ir::{Endpoint, Entity, Field, Method, Schema, TypeRef};

pub const OPENAPI_VERSION: &str = "3.0.3";

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

static COLON_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));
static BRACE_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// JSON schema for one type reference
pub fn type_schema(t: &TypeRef) -> Value {
    match t {
        TypeRef::String | TypeRef::Enum => json!({"type": "string"}),
        TypeRef::Int => json!({"type": "integer", "format": "int32"}),
        TypeRef::Int64 => json!({"type": "integer", "format": "int64"}),
        TypeRef::Float => json!({"type": "number", "format": "double"}),
        TypeRef::Bool => json!({"type": "boolean"}),
        TypeRef::Time => json!({"type": "string", "format": "date-time"}),
        TypeRef::Uuid => json!({"type": "string", "format": "uuid"}),
        TypeRef::File => json!({"type": "string", "format": "binary"}),
        TypeRef::Json | TypeRef::Any => json!({"type": "object"}),
        TypeRef::Entity { name } => json!({"$ref": format!("#/components/schemas/{name}")}),
        TypeRef::List { item } => json!({"type": "array", "items": type_schema(item)}),
        TypeRef::Map { item, .. } => json!({"type": "object", "additionalProperties": type_schema(item)}),
    }
}

fn field_schema(f: &Field) -> Value {
    let mut schema = if !f.item_fields.is_empty() {
        json!({"type": "array", "items": object_schema(&f.item_fields)})
    } else {
        type_schema(&f.type_ref)
    };
    if let Value::Object(obj) = &mut schema {
        if let Some(values) = f.metadata.get("enum").and_then(Value::as_array) {
            obj.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(default) = &f.default {
            obj.insert("default".into(), default.clone());
        }
        if f.secret {
            obj.insert("writeOnly".into(), Value::Bool(true));
        }
    }
    schema
}

/// Object schema over visible fields; secrets marked omit-from-response are
/// left out
fn object_schema(fields: &[Field]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for f in fields.iter().filter(|f| !f.skip_domain) {
        if f.metadata.get("omit_from_response").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        properties.insert(f.name.clone(), field_schema(f));
        if f.is_required() {
            required.push(Value::String(f.name.clone()));
        }
    }
    let mut obj = Map::new();
    obj.insert("type".into(), json!("object"));
    obj.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        obj.insert("required".into(), Value::Array(required));
    }
    Value::Object(obj)
}

/// `/users/:id` and `/users/{id}` both become `/users/{id}`
pub fn normalize_path(path: &str) -> String {
    COLON_PARAM.replace_all(path.trim(), "{$1}").to_string()
}

fn path_params(path: &str) -> Vec<String> {
    BRACE_PARAM.captures_iter(path).map(|c| c[1].to_string()).collect()
}

fn io_name(method: &Method, entity: Option<&Entity>, suffix: &str) -> String {
    match entity {
        Some(e) if !e.name.is_empty() => e.name.clone(),
        _ => format!("{}{suffix}", method.name),
    }
}

fn operation(schema: &Schema, ep: &Endpoint) -> Value {
    let method = schema.service(&ep.service).and_then(|s| s.method(&ep.rpc));
    let mut op = Map::new();
    op.insert("operationId".into(), json!(ep.rpc));
    op.insert("tags".into(), json!([ep.service]));
    if !ep.description.is_empty() {
        op.insert("summary".into(), json!(ep.description));
    }

    let path = normalize_path(&ep.path);
    let params: Vec<Value> = path_params(&path)
        .into_iter()
        .map(|p| json!({"name": p, "in": "path", "required": true, "schema": {"type": "string"}}))
        .collect();
    if !params.is_empty() {
        op.insert("parameters".into(), Value::Array(params));
    }

    if let Some(m) = method {
        if matches!(ep.method.as_str(), "POST" | "PUT" | "PATCH") && m.input.is_some() {
            let name = io_name(m, m.input.as_ref(), "Request");
            op.insert(
                "requestBody".into(),
                json!({
                    "required": true,
                    "content": {"application/json": {"schema": {"$ref": format!("#/components/schemas/{name}")}}}
                }),
            );
        }
    }

    let mut responses = Map::new();
    let ok = match method.and_then(|m| m.output.as_ref().map(|o| (m, o))) {
        Some((m, out)) => {
            let name = io_name(m, Some(out), "Response");
            json!({
                "description": "OK",
                "content": {"application/json": {"schema": {"$ref": format!("#/components/schemas/{name}")}}}
            })
        }
        None => json!({"description": "OK"}),
    };
    responses.insert("200".into(), ok);
    for err_name in &ep.errors {
        let Some(def) = schema.errors.iter().find(|e| &e.name == err_name) else {
            continue;
        };
        let status = if def.http_status > 0 { def.http_status } else { 500 };
        responses.insert(
            status.to_string(),
            json!({"description": def.message, "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Error"}}}}),
        );
    }
    op.insert("responses".into(), Value::Object(responses));

    if ep.auth.is_some() {
        op.insert("security".into(), json!([{"bearerAuth": []}]));
    }
    Value::Object(op)
}

/// Full document; paths and schemas are keyed maps, so output order is stable
pub fn build_openapi(schema: &Schema) -> Value {
    let title = if schema.project.name.is_empty() {
        "ANG API".to_string()
    } else {
        schema.project.name.clone()
    };
    let version = if schema.project.version.is_empty() {
        "0.1.0".to_string()
    } else {
        schema.project.version.clone()
    };

    let mut paths: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
    for ep in schema.endpoints.iter().filter(|e| HTTP_METHODS.contains(&e.method.as_str())) {
        paths
            .entry(normalize_path(&ep.path))
            .or_default()
            .insert(ep.method.to_lowercase(), operation(schema, ep));
    }

    let mut schemas = Map::new();
    for e in &schema.entities {
        schemas.insert(e.name.clone(), object_schema(&e.fields));
    }
    for svc in &schema.services {
        for m in &svc.methods {
            if let Some(input) = &m.input {
                schemas.insert(io_name(m, Some(input), "Request"), object_schema(&input.fields));
            }
            if let Some(output) = &m.output {
                schemas.insert(io_name(m, Some(output), "Response"), object_schema(&output.fields));
            }
        }
    }
    schemas.insert(
        "Error".into(),
        json!({
            "type": "object",
            "properties": {"code": {"type": "integer"}, "message": {"type": "string"}},
            "required": ["code", "message"]
        }),
    );

    json!({
        "openapi": OPENAPI_VERSION,
        "info": {"title": title, "version": version},
        "paths": paths,
        "components": {
            "schemas": schemas,
            "securitySchemes": {"bearerAuth": {"type": "http", "scheme": "bearer", "bearerFormat": "JWT"}}
        }
    })
}
