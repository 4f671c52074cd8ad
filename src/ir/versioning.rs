//! IR version migrations and canonical serialization
//!
//! Version history:
//! - `""`/`"0"`: legacy, metadata maps may be absent
//! - `"1"`: metadata maps present on every record
//! - `"2"`: entity and field source maps stamped into metadata, `uses`
//!   lists sorted and deduplicated

use anyhow::{bail, Result};
use serde_json::{json, Map};

use super::types::Schema;

pub const IR_VERSION_V1: &str = "1";
pub const IR_VERSION_V2: &str = "2";
pub const IR_VERSION_CURRENT: &str = IR_VERSION_V2;

/// Upgrade `schema` in place to [`IR_VERSION_CURRENT`]
pub fn migrate_to_current(schema: &mut Schema) -> Result<()> {
    loop {
        let version = schema.ir_version.trim().to_string();
        match version.as_str() {
            "" | "0" => migrate_v0_to_v1(schema),
            IR_VERSION_V1 => migrate_v1_to_v2(schema),
            IR_VERSION_V2 => {
                normalize_v2_invariants(schema);
                return Ok(());
            }
            other => bail!("unsupported ir_version {other:?} (current={IR_VERSION_CURRENT})"),
        }
    }
}

/// Metadata maps are always present in serialized form, so v0 to v1 only
/// bumps the version.
fn migrate_v0_to_v1(schema: &mut Schema) {
    schema.ir_version = IR_VERSION_V1.to_string();
}

fn migrate_v1_to_v2(schema: &mut Schema) {
    schema.ir_version = IR_VERSION_V2.to_string();
    normalize_v2_invariants(schema);
}

fn normalize_v2_invariants(schema: &mut Schema) {
    let mut entity_sources = Map::new();
    for entity in &mut schema.entities {
        if !entity.source.is_empty() {
            entity_sources.insert(entity.name.clone(), json!(entity.source));
        }
        let field_sources: Map<String, serde_json::Value> = entity
            .fields
            .iter()
            .filter(|f| !f.source.is_empty())
            .map(|f| (f.name.clone(), json!(f.source)))
            .collect();
        if !field_sources.is_empty() {
            entity
                .metadata
                .insert("field_sources".to_string(), serde_json::Value::Object(field_sources));
        }
    }
    if !entity_sources.is_empty() {
        schema
            .metadata
            .insert("entity_sources".to_string(), serde_json::Value::Object(entity_sources));
    }
    for svc in &mut schema.services {
        svc.uses.retain(|u| !u.trim().is_empty());
        svc.uses.sort();
        svc.uses.dedup();
    }
}

/// Migrate, then serialize as stable indented JSON with a trailing newline
pub fn to_canonical_json(schema: &mut Schema) -> Result<String> {
    migrate_to_current(schema)?;
    let mut out = serde_json::to_string_pretty(schema)?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{Entity, Field, Service, TypeRef};
    use pretty_assertions::assert_eq;

    fn legacy() -> Schema {
        Schema {
            entities: vec![Entity {
                name: "User".into(),
                source: "cue/domain/user.cue:3".into(),
                fields: vec![Field {
                    source: "cue/domain/user.cue:4".into(),
                    ..Field::new("email", TypeRef::String)
                }],
                ..Default::default()
            }],
            services: vec![Service {
                name: "orders".into(),
                uses: vec!["users".into(), "billing".into(), "users".into()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_migrate_legacy_to_current() {
        let mut schema = legacy();
        migrate_to_current(&mut schema).unwrap();
        assert_eq!(schema.ir_version, IR_VERSION_CURRENT);
        assert_eq!(schema.services[0].uses, vec!["billing", "users"]);
        assert_eq!(schema.metadata["entity_sources"]["User"], json!("cue/domain/user.cue:3"));
        assert_eq!(
            schema.entities[0].metadata["field_sources"]["email"],
            json!("cue/domain/user.cue:4")
        );
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut once = legacy();
        migrate_to_current(&mut once).unwrap();
        let mut twice = once.clone();
        migrate_to_current(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_version_fails() {
        let mut schema = Schema {
            ir_version: "9".into(),
            ..Default::default()
        };
        let err = migrate_to_current(&mut schema).unwrap_err();
        assert_eq!(err.to_string(), "unsupported ir_version \"9\" (current=2)");
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let a = to_canonical_json(&mut legacy()).unwrap();
        let b = to_canonical_json(&mut legacy()).unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with("}\n"));
        assert!(a.contains("\"ir_version\": \"2\""));
    }
}
