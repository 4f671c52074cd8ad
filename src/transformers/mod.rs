//! IR transformers and attribute hooks
//!
//! Transformers are ordered, idempotent rewrites of the whole schema. Hooks
//! react to individual attributes on fields and methods. The pipeline runs
//! every enabled transformer first, then every hook.

mod builtin;
mod hooks;

pub use builtin::*;
pub use hooks::*;

use anyhow::Result;
use tracing::debug;

use crate::ir::Schema;
use crate::normalizer::TransformersConfig;

/// One schema rewrite
pub trait Transformer: Send + Sync {
    /// Stable identifier, also used in error context
    fn name(&self) -> &str;

    /// Rewrite `schema` in place; applying twice has no further effect
    fn transform(&self, schema: &mut Schema) -> Result<()>;
}

/// Ordered list of transformers
#[derive(Default)]
pub struct TransformerRegistry {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, t: Box<dyn Transformer>) {
        self.transformers.push(t);
    }

    pub fn names(&self) -> Vec<&str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    /// Run every transformer in registration order, stopping at the first
    /// failure
    pub fn apply(&self, schema: &mut Schema) -> Result<()> {
        for t in &self.transformers {
            debug!(transformer = t.name(), "applying transformer");
            t.transform(schema)?;
        }
        Ok(())
    }

    /// Built-ins in their fixed order, filtered by the project config
    pub fn from_config(cfg: &TransformersConfig) -> Self {
        let mut r = Self::new();
        if cfg.image {
            r.register(Box::new(ImageTransformer {
                thumb_suffix: cfg.thumb_suffix.clone(),
            }));
        }
        if cfg.validation {
            r.register(Box::new(ValidationTransformer));
        }
        if cfg.timestamps {
            r.register(Box::new(TimestampTransformer));
        }
        if cfg.soft_delete {
            r.register(Box::new(SoftDeleteTransformer));
        }
        if cfg.tracing {
            r.register(Box::new(TracingTransformer));
        }
        if cfg.caching {
            r.register(Box::new(CachingTransformer));
        }
        if cfg.field_security {
            r.register(Box::new(FieldSecurityTransformer));
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_order() {
        let r = TransformerRegistry::from_config(&TransformersConfig::default());
        assert_eq!(
            r.names(),
            vec!["image", "validation", "timestamps", "tracing", "caching", "field_security"]
        );
    }

    #[test]
    fn test_disabled_transformers_are_skipped() {
        let cfg = TransformersConfig {
            image: false,
            tracing: false,
            soft_delete: true,
            ..Default::default()
        };
        let r = TransformerRegistry::from_config(&cfg);
        assert_eq!(
            r.names(),
            vec!["validation", "timestamps", "soft_delete", "caching", "field_security"]
        );
    }
}
