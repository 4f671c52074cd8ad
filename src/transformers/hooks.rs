use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};

use crate::ir::{Attribute, Field, Method, Schema};

/// Reacts to one attribute name on fields and methods
pub trait Hook: Send + Sync {
    fn attribute(&self) -> &str;

    fn on_field(&self, _entity: &str, _field: &mut Field, _attr: &Attribute) -> Result<()> {
        Ok(())
    }

    fn on_method(&self, _service: &str, _method: &mut Method, _attr: &Attribute) -> Result<()> {
        Ok(())
    }
}

/// Hooks keyed by attribute name, run in registration order per attribute
#[derive(Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Vec<Box<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Box<dyn Hook>) {
        self.hooks.entry(hook.attribute().to_string()).or_default().push(hook);
    }

    pub fn attributes(&self) -> Vec<&str> {
        self.hooks.keys().map(String::as_str).collect()
    }

    /// Built-in hooks: db, validate, image, file, env, cache, encrypt, redact
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register(Box::new(DbHook));
        r.register(Box::new(ValidateHook));
        r.register(Box::new(ImageHook));
        r.register(Box::new(FileHook));
        r.register(Box::new(EnvHook));
        r.register(Box::new(CacheHook));
        r.register(Box::new(EncryptHook));
        r.register(Box::new(RedactHook));
        r
    }

    /// Visit every entity field, then every service method
    pub fn process(&self, schema: &mut Schema) -> Result<()> {
        for entity in &mut schema.entities {
            for field in &mut entity.fields {
                // attributes are cloned so hooks may rewrite the field freely
                for attr in field.attributes.clone() {
                    for hook in self.hooks.get(&attr.name).into_iter().flatten() {
                        hook.on_field(&entity.name, field, &attr).map_err(|e| {
                            anyhow!("hook {} on field {}.{}: {e}", attr.name, entity.name, field.name)
                        })?;
                    }
                }
            }
        }
        for svc in &mut schema.services {
            for method in &mut svc.methods {
                for attr in method.attributes.clone() {
                    for hook in self.hooks.get(&attr.name).into_iter().flatten() {
                        hook.on_method(&svc.name, method, &attr).map_err(|e| {
                            anyhow!("hook {} on method {}.{}: {e}", attr.name, svc.name, method.name)
                        })?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Named argument, falling back to the positional `_` argument
fn str_or_positional<'a>(attr: &'a Attribute, key: &str) -> Option<&'a str> {
    attr.str_arg(key).or_else(|| attr.str_arg("_")).filter(|s| !s.is_empty())
}

fn bool_arg(attr: &Attribute, key: &str) -> Option<bool> {
    match attr.args.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub struct DbHook;

impl Hook for DbHook {
    fn attribute(&self) -> &str {
        "db"
    }

    fn on_field(&self, _entity: &str, field: &mut Field, attr: &Attribute) -> Result<()> {
        if let Some(t) = attr.str_arg("type") {
            field.metadata.insert("sql_type".into(), json!(t));
        }
        for flag in ["primary_key", "unique", "index"] {
            if bool_arg(attr, flag) == Some(true) {
                field.metadata.insert(flag.into(), json!(true));
            }
        }
        Ok(())
    }
}

pub struct ValidateHook;

impl Hook for ValidateHook {
    fn attribute(&self) -> &str {
        "validate"
    }

    fn on_field(&self, _entity: &str, field: &mut Field, attr: &Attribute) -> Result<()> {
        if let Some(rule) = str_or_positional(attr, "rule") {
            field.metadata.insert("validate_rule".into(), json!(rule));
        }
        Ok(())
    }
}

pub struct ImageHook;

impl Hook for ImageHook {
    fn attribute(&self) -> &str {
        "image"
    }

    fn on_field(&self, _entity: &str, field: &mut Field, attr: &Attribute) -> Result<()> {
        field.metadata.insert("file_kind".into(), json!("image"));
        field.metadata.insert("generate_thumbnail".into(), json!(true));
        let suffix = attr.str_arg("thumb_suffix").unwrap_or("_thumb");
        field.metadata.insert("thumb_suffix".into(), json!(suffix));
        Ok(())
    }
}

pub struct FileHook;

impl Hook for FileHook {
    fn attribute(&self) -> &str {
        "file"
    }

    fn on_field(&self, _entity: &str, field: &mut Field, attr: &Attribute) -> Result<()> {
        let kind = str_or_positional(attr, "kind").unwrap_or("auto");
        field.metadata.insert("file_kind".into(), json!(kind));
        if let Some(thumb) = bool_arg(attr, "thumbnail") {
            field.metadata.insert("generate_thumbnail".into(), json!(thumb));
        }
        Ok(())
    }
}

pub struct EnvHook;

impl Hook for EnvHook {
    fn attribute(&self) -> &str {
        "env"
    }

    fn on_field(&self, _entity: &str, field: &mut Field, attr: &Attribute) -> Result<()> {
        let Some(name) = str_or_positional(attr, "name") else {
            bail!("missing variable name");
        };
        field.metadata.insert("env_var".into(), json!(name));
        Ok(())
    }
}

pub struct CacheHook;

impl Hook for CacheHook {
    fn attribute(&self) -> &str {
        "cache"
    }

    fn on_method(&self, _service: &str, method: &mut Method, attr: &Attribute) -> Result<()> {
        if let Some(ttl) = str_or_positional(attr, "ttl") {
            method.cache_ttl = ttl.to_string();
            method.metadata.insert("cache_enabled".into(), json!(true));
        }
        if let Some(key) = attr.str_arg("key") {
            method.metadata.insert("cache_key_template".into(), json!(key));
        }
        Ok(())
    }
}

pub const ENCRYPT_MODES: &[&str] = &["randomized", "deterministic"];

pub struct EncryptHook;

impl Hook for EncryptHook {
    fn attribute(&self) -> &str {
        "encrypt"
    }

    fn on_field(&self, _entity: &str, field: &mut Field, attr: &Attribute) -> Result<()> {
        let mode = str_or_positional(attr, "mode").unwrap_or("randomized");
        if !ENCRYPT_MODES.contains(&mode) {
            bail!("unsupported encrypt mode {mode:?} (expected one of: {})", ENCRYPT_MODES.join(", "));
        }
        field.metadata.insert("encrypt_mode".into(), json!(mode));
        // deterministic ciphertext is the only mode that can back an equality index
        field.metadata.insert("encrypt_searchable".into(), json!(mode == "deterministic"));
        Ok(())
    }
}

pub struct RedactHook;

impl Hook for RedactHook {
    fn attribute(&self) -> &str {
        "redact"
    }

    fn on_field(&self, _entity: &str, field: &mut Field, attr: &Attribute) -> Result<()> {
        field.metadata.insert("redact".into(), json!(true));
        let mask = str_or_positional(attr, "mask").unwrap_or("***");
        field.metadata.insert("redact_mask".into(), json!(mask));
        Ok(())
    }
}
