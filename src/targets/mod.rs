//! Target plugins
//!
//! A plugin is a named group of generation steps. Every target build creates a
//! fresh [`StepRegistry`], lets each resolved plugin register its steps, then
//! executes the registry against the target's capability set.
//!
//! Plugins declare a v2 [`PluginDescriptor`]; the registry validates it, and
//! its compatibility window against this compiler, before a plugin is used.

mod asyncapi;
mod catalog;
mod go_legacy;
mod openapi;
mod python_fastapi;
mod shared;
mod sql;

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::capabilities::Capability;
use crate::generator::{ArtifactSink, Step, StepRegistry};
use crate::ir::{Schema, IR_VERSION_CURRENT};
use crate::normalizer::infra_registry::InfraValues;
use crate::normalizer::{ProjectDef, ScenarioDef, TargetDef};
use crate::normalizer::infra_registry::{InfraLanguage, InfraRegistry};
use crate::render::{RenderUnit, Renderer};

pub use go_legacy::GoLegacyPlugin;
pub use python_fastapi::PythonFastapiPlugin;
pub use shared::SharedPlugin;

pub const PLUGIN_SDK_V2: &str = "v2";

/// Everything a plugin needs to register steps for one target
#[derive(Clone)]
pub struct BuildContext {
    pub schema: Arc<Schema>,
    pub target: TargetDef,
    pub project: Option<ProjectDef>,
    pub scenarios: Arc<Vec<ScenarioDef>>,
    pub infra: Arc<InfraValues>,
    pub renderer: Arc<dyn Renderer>,
    /// Directory for language source units of this target
    pub backend_dir: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginCompatibility {
    pub min_ang_version: String,
    pub max_ang_version: String,
    /// Empty accepts every IR version
    pub supported_schema_versions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub sdk_version: String,
    pub capabilities: Vec<String>,
    pub compatibility: PluginCompatibility,
}

pub trait TargetPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability>;

    fn register_steps(&self, registry: &mut StepRegistry, ctx: &BuildContext);

    /// `None` marks a legacy plugin, which is rejected
    fn descriptor(&self) -> Option<PluginDescriptor> {
        None
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin with empty name")]
    EmptyName,

    #[error("plugin {0:?} already registered")]
    AlreadyRegistered(String),

    #[error("unknown plugin {name:?} (available: {available})")]
    Unknown { name: String, available: String },

    #[error("plugin {0:?} uses legacy SDK; implement descriptor() for v2")]
    LegacySdk(String),

    #[error("plugin {plugin:?} declares unsupported SDK version {version:?} (expected \"v2\")")]
    UnsupportedSdk { plugin: String, version: String },

    #[error("plugin {0:?} declares empty capability")]
    EmptyCapability(String),

    #[error("plugin {plugin:?} declares duplicated capability {capability:?}")]
    DuplicateCapability { plugin: String, capability: String },

    #[error("plugin {plugin:?} compatibility check failed: invalid version {version:?}")]
    InvalidVersion { plugin: String, version: String },

    #[error("plugin {plugin:?} incompatible with ANG {current} (supported min={min:?} max={max:?})")]
    IncompatibleHost {
        plugin: String,
        current: String,
        min: String,
        max: String,
    },

    #[error("plugin {plugin:?} incompatible with schema {current} (supported: {supported})")]
    IncompatibleSchema {
        plugin: String,
        current: String,
        supported: String,
    },
}

// ============================================================================
// Descriptor checks
// ============================================================================

/// `major.minor[.patch]`
fn parse_version(raw: &str) -> Option<[u64; 3]> {
    let parts: Vec<&str> = raw.trim().split('.').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let mut out = [0u64; 3];
    for (slot, part) in out.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    Some(out)
}

/// Fills defaults: an empty SDK version means v2 and empty capabilities come
/// from the plugin itself
fn descriptor_for(plugin: &dyn TargetPlugin) -> Result<PluginDescriptor, PluginError> {
    let mut desc = plugin
        .descriptor()
        .ok_or_else(|| PluginError::LegacySdk(plugin.name().to_string()))?;
    if desc.sdk_version.trim().is_empty() {
        desc.sdk_version = PLUGIN_SDK_V2.to_string();
    }
    if desc.capabilities.is_empty() {
        desc.capabilities = plugin.capabilities().iter().map(|c| c.as_str().to_string()).collect();
    }
    Ok(desc)
}

pub fn validate_descriptor(plugin: &str, desc: &PluginDescriptor) -> Result<(), PluginError> {
    if desc.sdk_version.trim() != PLUGIN_SDK_V2 {
        return Err(PluginError::UnsupportedSdk {
            plugin: plugin.to_string(),
            version: desc.sdk_version.clone(),
        });
    }
    let mut seen = BTreeSet::new();
    for cap in &desc.capabilities {
        if cap.trim().is_empty() {
            return Err(PluginError::EmptyCapability(plugin.to_string()));
        }
        if !seen.insert(cap.as_str()) {
            return Err(PluginError::DuplicateCapability {
                plugin: plugin.to_string(),
                capability: cap.clone(),
            });
        }
    }
    Ok(())
}

pub fn validate_compatibility(
    plugin: &str,
    desc: &PluginDescriptor,
    ang_version: &str,
    schema_version: &str,
) -> Result<(), PluginError> {
    let compat = &desc.compatibility;
    let invalid = |version: &str| PluginError::InvalidVersion {
        plugin: plugin.to_string(),
        version: version.to_string(),
    };
    let current = parse_version(ang_version).ok_or_else(|| invalid(ang_version))?;

    let mut allowed = true;
    if !compat.min_ang_version.trim().is_empty() {
        let min = parse_version(&compat.min_ang_version).ok_or_else(|| invalid(&compat.min_ang_version))?;
        allowed &= current >= min;
    }
    if !compat.max_ang_version.trim().is_empty() {
        let max = parse_version(&compat.max_ang_version).ok_or_else(|| invalid(&compat.max_ang_version))?;
        allowed &= current <= max;
    }
    if !allowed {
        return Err(PluginError::IncompatibleHost {
            plugin: plugin.to_string(),
            current: ang_version.to_string(),
            min: compat.min_ang_version.clone(),
            max: compat.max_ang_version.clone(),
        });
    }

    let schemas = &compat.supported_schema_versions;
    if !schemas.is_empty() && !schemas.iter().any(|s| s.trim() == schema_version) {
        return Err(PluginError::IncompatibleSchema {
            plugin: plugin.to_string(),
            current: schema_version.to_string(),
            supported: schemas.join(", "),
        });
    }
    Ok(())
}

fn validate_plugin_contract(plugin: &dyn TargetPlugin) -> Result<(), PluginError> {
    let desc = descriptor_for(plugin)?;
    validate_descriptor(plugin.name(), &desc)?;
    validate_compatibility(plugin.name(), &desc, crate::COMPILER_VERSION, IR_VERSION_CURRENT)
}

/// Descriptor shared by the in-tree plugins
pub(crate) fn builtin_descriptor() -> PluginDescriptor {
    PluginDescriptor {
        sdk_version: PLUGIN_SDK_V2.to_string(),
        capabilities: Vec::new(),
        compatibility: PluginCompatibility {
            min_ang_version: "0.1.0".to_string(),
            max_ang_version: String::new(),
            supported_schema_versions: vec![IR_VERSION_CURRENT.to_string()],
        },
    }
}

/// Register a step whose output is a set of rendered source units
pub(crate) fn unit_step<F>(registry: &mut StepRegistry, ctx: &BuildContext, name: &str, requires: &[Capability], units: F)
where
    F: Fn(&BuildContext) -> anyhow::Result<Vec<RenderUnit>> + Send + Sync + 'static,
{
    let ctx = ctx.clone();
    registry.register(Step::new(name, requires, move |sink: &mut ArtifactSink| {
        for unit in units(&ctx)? {
            let content = ctx.renderer.render(&unit)?;
            sink.write(&unit.path, content)?;
        }
        Ok(())
    }));
}

/// Steps contributed by infra definitions present in this build. Requirement
/// names that are not known capabilities make the step unreachable, so it is
/// dropped.
pub(crate) fn register_infra_steps(
    registry: &mut StepRegistry,
    ctx: &BuildContext,
    lang: InfraLanguage,
    template_prefix: &'static str,
    path_for: fn(&BuildContext, &str) -> String,
) {
    let infra = InfraRegistry::new();
    let patch = infra.build_context_patch(&ctx.infra);
    for step in infra.steps_for_values(lang, &ctx.infra) {
        let requires: Result<Vec<Capability>, _> = step.requires.iter().map(|r| r.parse::<Capability>()).collect();
        let Ok(requires) = requires else {
            tracing::warn!(step = step.name, key = step.key, "infra step requires an unknown capability; dropped");
            continue;
        };
        let key = step.key;
        let patch = patch.clone();
        unit_step(registry, ctx, step.name, &requires, move |ctx| {
            Ok(vec![RenderUnit::new(
                format!("{template_prefix}/infra/{key}"),
                path_for(ctx, key),
                serde_json::json!({
                    "key": key,
                    "target": ctx.target,
                    "context": patch,
                    "notifications": ctx.schema.notifications,
                    "auth": ctx.schema.auth,
                }),
            )])
        });
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Plugins in registration order
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn TargetPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `shared`, `python_fastapi`, `go_legacy`
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.plugins.push(Arc::new(SharedPlugin));
        registry.plugins.push(Arc::new(PythonFastapiPlugin));
        registry.plugins.push(Arc::new(GoLegacyPlugin));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn TargetPlugin>) -> Result<(), PluginError> {
        let name = plugin.name().trim();
        if name.is_empty() {
            return Err(PluginError::EmptyName);
        }
        if self.get(name).is_some() {
            return Err(PluginError::AlreadyRegistered(name.to_string()));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TargetPlugin>> {
        self.plugins.iter().find(|p| p.name().trim() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// All plugins when the project lists none, otherwise the listed ones in
    /// listed order. Names are trimmed; blanks and repeats are skipped.
    pub fn resolve(&self, project: Option<&ProjectDef>) -> Result<Vec<Arc<dyn TargetPlugin>>, PluginError> {
        let requested = project.map(|p| p.plugins.as_slice()).unwrap_or_default();
        if requested.is_empty() {
            for plugin in &self.plugins {
                validate_plugin_contract(plugin.as_ref())?;
            }
            return Ok(self.plugins.clone());
        }

        let mut out = Vec::with_capacity(requested.len());
        let mut seen = BTreeSet::new();
        for raw in requested {
            let key = raw.trim();
            if key.is_empty() || seen.contains(key) {
                continue;
            }
            let Some(plugin) = self.get(key) else {
                let mut available = self.names();
                available.sort();
                return Err(PluginError::Unknown {
                    name: key.to_string(),
                    available: available.join(", "),
                });
            };
            validate_plugin_contract(plugin.as_ref())?;
            seen.insert(key);
            out.push(plugin.clone());
        }
        Ok(out)
    }
}

/// Resolve against the built-in plugins
pub fn resolve_plugins(project: Option<&ProjectDef>) -> Result<Vec<Arc<dyn TargetPlugin>>, PluginError> {
    PluginRegistry::builtin().resolve(project)
}

/// Language source directory for one target. A single target writes straight
/// into the backend directory; several targets get one subdirectory each.
pub fn backend_dir_for(base: &str, target: &TargetDef, target_count: usize) -> String {
    let base = base.trim().trim_end_matches('/');
    let base = if base.is_empty() { "." } else { base };
    if target_count > 1 {
        format!("{base}/{}", target.name)
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fake {
        name: &'static str,
        desc: Option<PluginDescriptor>,
    }

    impl TargetPlugin for Fake {
        fn name(&self) -> &str {
            self.name
        }
        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::Http]
        }
        fn register_steps(&self, _: &mut StepRegistry, _: &BuildContext) {}
        fn descriptor(&self) -> Option<PluginDescriptor> {
            self.desc.clone()
        }
    }

    fn project(plugins: &[&str]) -> ProjectDef {
        ProjectDef {
            name: "demo".into(),
            version: "1.0.0".into(),
            plugins: plugins.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn names(plugins: &[Arc<dyn TargetPlugin>]) -> Vec<String> {
        plugins.iter().map(|p| p.name().to_string()).collect()
    }

    #[test]
    fn test_resolve_defaults_to_all_builtins() {
        assert_eq!(names(&resolve_plugins(None).unwrap()), vec!["shared", "python_fastapi", "go_legacy"]);
        assert_eq!(names(&resolve_plugins(Some(&project(&[]))).unwrap()).len(), 3);
    }

    #[test]
    fn test_resolve_listed_subset_in_order() {
        let p = project(&[" go_legacy ", "", "shared", "go_legacy"]);
        assert_eq!(names(&resolve_plugins(Some(&p)).unwrap()), vec!["go_legacy", "shared"]);
    }

    #[test]
    fn test_resolve_unknown_plugin() {
        let err = resolve_plugins(Some(&project(&["rust_axum"]))).err().unwrap();
        assert_eq!(
            err.to_string(),
            "unknown plugin \"rust_axum\" (available: go_legacy, python_fastapi, shared)"
        );
    }

    #[test]
    fn test_legacy_and_bad_descriptors_rejected() {
        let mut reg = PluginRegistry::new();
        reg.register(Arc::new(Fake { name: "old", desc: None })).unwrap();
        let err = reg.resolve(None).err().unwrap();
        assert_eq!(err, PluginError::LegacySdk("old".into()));

        let dup = PluginDescriptor {
            capabilities: vec!["http".into(), "http".into()],
            ..Default::default()
        };
        assert_eq!(
            validate_descriptor("p", &PluginDescriptor { sdk_version: "v2".into(), ..dup.clone() }),
            Err(PluginError::DuplicateCapability {
                plugin: "p".into(),
                capability: "http".into()
            })
        );
        let v1 = PluginDescriptor {
            sdk_version: "v1".into(),
            ..Default::default()
        };
        assert_eq!(
            validate_descriptor("p", &v1).unwrap_err().to_string(),
            "plugin \"p\" declares unsupported SDK version \"v1\" (expected \"v2\")"
        );
        let blank = PluginDescriptor {
            sdk_version: "v2".into(),
            capabilities: vec![" ".into()],
            ..Default::default()
        };
        assert_eq!(validate_descriptor("p", &blank), Err(PluginError::EmptyCapability("p".into())));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut reg = PluginRegistry::builtin();
        let err = reg
            .register(Arc::new(Fake {
                name: "shared",
                desc: Some(builtin_descriptor()),
            }))
            .unwrap_err();
        assert_eq!(err, PluginError::AlreadyRegistered("shared".into()));
    }

    #[test]
    fn test_compatibility_window() {
        let mut desc = builtin_descriptor();
        desc.compatibility.min_ang_version = "1.2".into();
        assert_eq!(
            validate_compatibility("p", &desc, "1.1.9", "2").unwrap_err().to_string(),
            "plugin \"p\" incompatible with ANG 1.1.9 (supported min=\"1.2\" max=\"\")"
        );
        assert!(validate_compatibility("p", &desc, "1.2.0", "2").is_ok());

        desc.compatibility.max_ang_version = "1.x".into();
        assert!(matches!(
            validate_compatibility("p", &desc, "1.2.0", "2"),
            Err(PluginError::InvalidVersion { .. })
        ));

        let desc = builtin_descriptor();
        assert_eq!(
            validate_compatibility("p", &desc, "0.1.0", "1").unwrap_err().to_string(),
            "plugin \"p\" incompatible with schema 1 (supported: 2)"
        );
    }

    #[test]
    fn test_backend_dir_per_target() {
        let t = TargetDef {
            name: "api".into(),
            ..Default::default()
        };
        assert_eq!(backend_dir_for("internal/", &t, 1), "internal");
        assert_eq!(backend_dir_for("internal", &t, 2), "internal/api");
        assert_eq!(backend_dir_for("", &t, 1), ".");
    }
}
