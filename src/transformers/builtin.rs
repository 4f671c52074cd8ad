use anyhow::Result;
use serde_json::json;

use super::Transformer;
use crate::ir::{Field, Schema, TypeRef};

fn generated(by: &str) -> crate::ir::Metadata {
    let mut m = crate::ir::Metadata::new();
    m.insert("generated_by".into(), json!(by));
    m
}

/// Adds a `<field><suffix>` thumbnail field after every `@image` field
pub struct ImageTransformer {
    pub thumb_suffix: String,
}

impl Transformer for ImageTransformer {
    fn name(&self) -> &str {
        "image"
    }

    fn transform(&self, schema: &mut Schema) -> Result<()> {
        let suffix = if self.thumb_suffix.is_empty() {
            "_thumb"
        } else {
            self.thumb_suffix.as_str()
        };
        for entity in &mut schema.entities {
            let mut fields = Vec::with_capacity(entity.fields.len());
            let existing: Vec<String> = entity.fields.iter().map(|f| f.name.clone()).collect();
            for mut field in std::mem::take(&mut entity.fields) {
                if field.attribute("image").is_none() {
                    fields.push(field);
                    continue;
                }
                let thumb_name = format!("{}{suffix}", field.name);
                field.metadata.insert("has_thumbnail".into(), json!(true));
                field.metadata.insert("thumbnail_field".into(), json!(thumb_name));
                let source_name = field.name.clone();
                fields.push(field);
                if existing.contains(&thumb_name) {
                    continue;
                }
                let mut thumb = Field::new(thumb_name, TypeRef::String);
                thumb.optional = true;
                thumb.metadata = generated("image_transformer");
                thumb.metadata.insert("source_field".into(), json!(source_name));
                fields.push(thumb);
            }
            entity.fields = fields;
        }
        Ok(())
    }
}

/// Copies `@validate` rules into field metadata; optional fields get
/// `omitempty`
pub struct ValidationTransformer;

impl Transformer for ValidationTransformer {
    fn name(&self) -> &str {
        "validation"
    }

    fn transform(&self, schema: &mut Schema) -> Result<()> {
        for field in schema.entities.iter_mut().flat_map(|e| e.fields.iter_mut()) {
            let Some(mut rule) = field
                .attribute("validate")
                .map(|a| a.str_arg("rule").unwrap_or_default().to_string())
            else {
                continue;
            };
            if field.optional && !rule.is_empty() && !rule.contains("omitempty") {
                rule.push_str(",omitempty");
            }
            field.metadata.insert("validate_tag".into(), json!(rule));
        }
        Ok(())
    }
}

/// `created_at`/`updated_at` for entities marked `@timestamps`
pub struct TimestampTransformer;

impl Transformer for TimestampTransformer {
    fn name(&self) -> &str {
        "timestamps"
    }

    fn transform(&self, schema: &mut Schema) -> Result<()> {
        for entity in schema.entities.iter_mut().filter(|e| e.metadata.contains_key("timestamps")) {
            for (name, auto_set) in [("created_at", "on_create"), ("updated_at", "on_update")] {
                if entity.has_field(name) {
                    continue;
                }
                let mut f = Field::new(name, TypeRef::Time);
                f.metadata = generated("timestamp_transformer");
                f.metadata.insert("auto_set".into(), json!(auto_set));
                entity.fields.push(f);
            }
        }
        Ok(())
    }
}

/// Optional `deleted_at` for entities marked `@softDelete`
pub struct SoftDeleteTransformer;

impl Transformer for SoftDeleteTransformer {
    fn name(&self) -> &str {
        "soft_delete"
    }

    fn transform(&self, schema: &mut Schema) -> Result<()> {
        for entity in schema.entities.iter_mut().filter(|e| e.metadata.contains_key("soft_delete")) {
            if entity.has_field("deleted_at") {
                continue;
            }
            let mut f = Field::new("deleted_at", TypeRef::Time);
            f.optional = true;
            f.metadata = generated("soft_delete_transformer");
            entity.fields.push(f);
        }
        Ok(())
    }
}

/// Span names for every method
pub struct TracingTransformer;

impl Transformer for TracingTransformer {
    fn name(&self) -> &str {
        "tracing"
    }

    fn transform(&self, schema: &mut Schema) -> Result<()> {
        for svc in &mut schema.services {
            svc.metadata.insert("tracing_enabled".into(), json!(true));
            for m in &mut svc.methods {
                m.metadata
                    .insert("span_name".into(), json!(format!("{}.{}", svc.name, m.name)));
            }
        }
        Ok(())
    }
}

/// Read-through cache settings from `@cache` or an HTTP cache TTL
pub struct CachingTransformer;

impl Transformer for CachingTransformer {
    fn name(&self) -> &str {
        "caching"
    }

    fn transform(&self, schema: &mut Schema) -> Result<()> {
        for svc in &mut schema.services {
            let mut any = false;
            for m in &mut svc.methods {
                let attr = m.attributes.iter().find(|a| a.name == "cache").cloned();
                if attr.is_none() && m.cache_ttl.is_empty() {
                    continue;
                }
                any = true;
                let ttl = attr
                    .as_ref()
                    .and_then(|a| a.args.get("ttl").cloned())
                    .or_else(|| (!m.cache_ttl.is_empty()).then(|| json!(m.cache_ttl)))
                    .unwrap_or_else(|| json!("5m"));
                let key = attr
                    .as_ref()
                    .and_then(|a| a.args.get("key").cloned())
                    .unwrap_or(serde_json::Value::Null);
                m.metadata.insert(
                    "cache".into(),
                    json!({"enabled": true, "ttl": ttl, "key": key, "strategy": "read-through"}),
                );
            }
            if any {
                svc.metadata.insert("needs_caching_decorator".into(), json!(true));
            }
        }
        Ok(())
    }
}

/// Marks secret, PII, encrypted and redacted fields so emitters can keep
/// them out of logs and responses
pub struct FieldSecurityTransformer;

impl Transformer for FieldSecurityTransformer {
    fn name(&self) -> &str {
        "field_security"
    }

    fn transform(&self, schema: &mut Schema) -> Result<()> {
        for entity in &mut schema.entities {
            let mut sensitive = false;
            for f in &mut entity.fields {
                let redact = f.secret || f.pii || f.attribute("redact").is_some();
                let encrypt = f.attribute("encrypt").is_some();
                if !redact && !encrypt {
                    continue;
                }
                sensitive = true;
                f.metadata.insert("sensitive".into(), json!(true));
                if redact {
                    f.metadata.insert("log_redact".into(), json!(true));
                }
                if f.secret {
                    f.metadata.insert("omit_from_response".into(), json!(true));
                }
            }
            if sensitive {
                entity.metadata.insert("has_sensitive_fields".into(), json!(true));
            }
        }
        Ok(())
    }
}
