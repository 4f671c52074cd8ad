//! Registry of infrastructure definitions read from the `infra` package
//!
//! Each entry names the CUE path it reads, the stable error code used when
//! extraction fails, and the generation steps it contributes per target
//! language. Entries are visited in key order so extraction and step
//! registration are deterministic.

use std::collections::BTreeMap;

use ang_cue::Value;
use serde::Serialize;
use thiserror::Error;

use super::types::{AuthDef, ConfigDef, NotificationChannelsDef, NotificationMutingDef, NotificationPoliciesDef};
use super::Normalizer;
use crate::error::{CUE_INFRA_AUTH_PARSE_ERROR, CUE_INFRA_CONFIG_PARSE_ERROR};

pub const INFRA_KEY_AUTH: &str = "auth";
pub const INFRA_KEY_CONFIG: &str = "config";
pub const INFRA_KEY_NOTIFICATION_CHANNELS: &str = "notification_channels";
pub const INFRA_KEY_NOTIFICATION_MUTING: &str = "notification_muting";
pub const INFRA_KEY_NOTIFICATION_POLICIES: &str = "notification_policies";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InfraLanguage {
    Go,
    Python,
}

impl InfraLanguage {
    pub fn from_lang(lang: &str) -> Option<Self> {
        match lang.trim().to_ascii_lowercase().as_str() {
            "go" => Some(Self::Go),
            "python" => Some(Self::Python),
            _ => None,
        }
    }
}

/// Parsed value of one infra entry
#[derive(Debug, Clone, PartialEq)]
pub enum InfraValue {
    Config(ConfigDef),
    Auth(AuthDef),
    NotificationChannels(NotificationChannelsDef),
    NotificationPolicies(NotificationPoliciesDef),
    NotificationMuting(NotificationMutingDef),
}

pub type InfraValues = BTreeMap<&'static str, InfraValue>;

type Extractor = fn(&Normalizer<'_>, &Value) -> anyhow::Result<Option<InfraValue>>;
type ContextHook = fn(&InfraValue, &mut InfraContextPatch);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraStepSpec {
    pub name: &'static str,
    pub requires: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfraResolvedStep {
    pub key: &'static str,
    pub name: &'static str,
    pub requires: Vec<String>,
}

pub struct InfraDef {
    pub key: &'static str,
    pub cue_path: &'static str,
    pub error_code: &'static str,
    pub error_op: &'static str,
    extractor: Extractor,
    context_hook: Option<ContextHook>,
    steps: &'static [(InfraLanguage, InfraStepSpec)],
}

/// Facts derived from infra values that change how other steps render
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InfraContextPatch {
    pub auth_service: String,
    pub auth_refresh_store: String,
    pub notification_muting: bool,
    pub force_has_cache: bool,
    pub force_has_sql: bool,
}

#[derive(Debug, Error)]
#[error("{code}: {op}: {source}")]
pub struct InfraExtractError {
    pub key: &'static str,
    pub code: &'static str,
    pub op: &'static str,
    #[source]
    pub source: anyhow::Error,
}

fn auth_hook(value: &InfraValue, patch: &mut InfraContextPatch) {
    let InfraValue::Auth(auth) = value else { return };
    patch.auth_service = auth.service.clone();
    patch.auth_refresh_store = auth.refresh_store.clone();
    let store = auth.refresh_store.trim();
    if store.eq_ignore_ascii_case("redis") || store.eq_ignore_ascii_case("hybrid") {
        patch.force_has_cache = true;
    }
    if store.eq_ignore_ascii_case("hybrid") {
        patch.force_has_sql = true;
    }
}

fn muting_hook(value: &InfraValue, patch: &mut InfraContextPatch) {
    if let InfraValue::NotificationMuting(def) = value {
        patch.notification_muting |= def.enabled;
    }
}

fn builtin_defs() -> Vec<InfraDef> {
    vec![
        InfraDef {
            key: INFRA_KEY_AUTH,
            cue_path: "#Auth",
            error_code: CUE_INFRA_AUTH_PARSE_ERROR,
            error_op: "extract auth",
            extractor: |n, v| Ok(n.extract_auth(v)?.map(InfraValue::Auth)),
            context_hook: Some(auth_hook),
            steps: &[(
                InfraLanguage::Python,
                InfraStepSpec {
                    name: "Python Auth Stores",
                    requires: &["profile_python_fastapi", "auth"],
                },
            )],
        },
        InfraDef {
            key: INFRA_KEY_CONFIG,
            cue_path: "#AppConfig",
            error_code: CUE_INFRA_CONFIG_PARSE_ERROR,
            error_op: "extract config",
            extractor: |n, v| Ok(n.extract_config(v)?.map(InfraValue::Config)),
            context_hook: None,
            steps: &[],
        },
        InfraDef {
            key: INFRA_KEY_NOTIFICATION_CHANNELS,
            cue_path: "#NotificationChannels",
            error_code: CUE_INFRA_CONFIG_PARSE_ERROR,
            error_op: "extract notification channels",
            extractor: |n, v| Ok(n.extract_notification_channels(v)?.map(InfraValue::NotificationChannels)),
            context_hook: None,
            steps: &[],
        },
        InfraDef {
            key: INFRA_KEY_NOTIFICATION_MUTING,
            cue_path: "#NotificationMuting",
            error_code: CUE_INFRA_CONFIG_PARSE_ERROR,
            error_op: "extract notification muting",
            extractor: |n, v| Ok(n.extract_notification_muting(v)?.map(InfraValue::NotificationMuting)),
            context_hook: Some(muting_hook),
            steps: &[(
                InfraLanguage::Go,
                InfraStepSpec {
                    name: "Notification Muting",
                    requires: &["profile_go_legacy"],
                },
            )],
        },
        InfraDef {
            key: INFRA_KEY_NOTIFICATION_POLICIES,
            cue_path: "#NotificationPolicies",
            error_code: CUE_INFRA_CONFIG_PARSE_ERROR,
            error_op: "extract notification policies",
            extractor: |n, v| Ok(n.extract_notification_policies(v)?.map(InfraValue::NotificationPolicies)),
            context_hook: None,
            steps: &[],
        },
    ]
}

pub struct InfraRegistry {
    defs: Vec<InfraDef>,
}

impl Default for InfraRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InfraRegistry {
    pub fn new() -> Self {
        let mut defs = builtin_defs();
        defs.sort_by_key(|d| d.key);
        Self { defs }
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.defs.iter().map(|d| d.key).collect()
    }

    pub fn get(&self, key: &str) -> Option<&InfraDef> {
        self.defs.iter().find(|d| d.key == key)
    }

    /// Run every extractor; absent definitions are simply not in the map
    pub fn extract_all(&self, n: &Normalizer<'_>, val: &Value) -> Result<InfraValues, InfraExtractError> {
        let mut out = InfraValues::new();
        for def in &self.defs {
            let parsed = (def.extractor)(n, val).map_err(|source| InfraExtractError {
                key: def.key,
                code: def.error_code,
                op: def.error_op,
                source,
            })?;
            if let Some(value) = parsed {
                out.insert(def.key, value);
            }
        }
        Ok(out)
    }

    pub fn build_context_patch(&self, values: &InfraValues) -> InfraContextPatch {
        let mut patch = InfraContextPatch::default();
        for def in &self.defs {
            if let (Some(hook), Some(value)) = (def.context_hook, values.get(def.key)) {
                hook(value, &mut patch);
            }
        }
        patch
    }

    /// Steps contributed for `lang` by the definitions present in `values`.
    /// Keys without a value or without a step for the language are skipped.
    pub fn steps_for_values(&self, lang: InfraLanguage, values: &InfraValues) -> Vec<InfraResolvedStep> {
        self.defs
            .iter()
            .filter(|def| values.contains_key(def.key))
            .filter_map(|def| {
                let (_, spec) = def.steps.iter().find(|(l, _)| *l == lang)?;
                (!spec.name.trim().is_empty()).then(|| InfraResolvedStep {
                    key: def.key,
                    name: spec.name,
                    requires: spec.requires.iter().map(|r| r.to_string()).collect(),
                })
            })
            .collect()
    }
}

pub fn infra_config(values: &InfraValues) -> Option<&ConfigDef> {
    match values.get(INFRA_KEY_CONFIG) {
        Some(InfraValue::Config(def)) => Some(def),
        _ => None,
    }
}

pub fn infra_auth(values: &InfraValues) -> Option<&AuthDef> {
    match values.get(INFRA_KEY_AUTH) {
        Some(InfraValue::Auth(def)) => Some(def),
        _ => None,
    }
}

pub fn infra_notification_channels(values: &InfraValues) -> Option<&NotificationChannelsDef> {
    match values.get(INFRA_KEY_NOTIFICATION_CHANNELS) {
        Some(InfraValue::NotificationChannels(def)) => Some(def),
        _ => None,
    }
}

pub fn infra_notification_policies(values: &InfraValues) -> Option<&NotificationPoliciesDef> {
    match values.get(INFRA_KEY_NOTIFICATION_POLICIES) {
        Some(InfraValue::NotificationPolicies(def)) => Some(def),
        _ => None,
    }
}

pub fn infra_notification_muting(values: &InfraValues) -> Option<&NotificationMutingDef> {
    match values.get(INFRA_KEY_NOTIFICATION_MUTING) {
        Some(InfraValue::NotificationMuting(def)) => Some(def),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    const INFRA: &str = r#"package infra

#AppConfig: {
	port: int
}

#Auth: {
	service: "auth_service"
	jwt: {
		alg: "HS256"
		tokens: {store: "redis"}
	}
}

#NotificationMuting: {
	enabled: true
}
"#;

    fn load(src: &str) -> Value {
        ang_cue::load_package(&[("cue/infra/infra.cue".to_string(), src.to_string())]).unwrap()
    }

    #[test]
    fn test_keys_are_sorted() {
        assert_eq!(
            InfraRegistry::new().keys(),
            vec!["auth", "config", "notification_channels", "notification_muting", "notification_policies"]
        );
    }

    #[test]
    fn test_extract_all_and_context_patch() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let reg = InfraRegistry::new();
        let values = reg.extract_all(&n, &load(INFRA)).unwrap();

        assert_eq!(infra_auth(&values).map(|a| a.alg.as_str()), Some("HS256"));
        assert!(!infra_config(&values).unwrap().fields.is_empty());
        assert!(infra_notification_muting(&values).unwrap().enabled);
        assert!(infra_notification_channels(&values).is_none());

        let patch = reg.build_context_patch(&values);
        assert_eq!(patch.auth_service, "auth_service");
        assert_eq!(patch.auth_refresh_store, "redis");
        assert!(patch.force_has_cache);
        assert!(!patch.force_has_sql);
        assert!(patch.notification_muting);
    }

    #[test]
    fn test_steps_for_values_per_language() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let reg = InfraRegistry::new();
        let values = reg.extract_all(&n, &load(INFRA)).unwrap();

        let go = reg.steps_for_values(InfraLanguage::Go, &values);
        assert_eq!(go.len(), 1);
        assert_eq!(go[0].name, "Notification Muting");
        assert_eq!(go[0].requires, vec!["profile_go_legacy"]);

        let py = reg.steps_for_values(InfraLanguage::Python, &values);
        assert_eq!(py[0].name, "Python Auth Stores");
        assert_eq!(py[0].requires, vec!["profile_python_fastapi", "auth"]);

        assert!(reg.steps_for_values(InfraLanguage::Go, &InfraValues::new()).is_empty());
    }

    #[test]
    fn test_extract_error_carries_code_and_op() {
        let sink = CollectingSink::new();
        let n = Normalizer::new(&sink);
        let src = "package infra\n\n#NotificationPolicies: {\n\trules: \"nope\"\n}\n";
        let err = InfraRegistry::new().extract_all(&n, &load(src)).unwrap_err();
        assert_eq!(err.key, INFRA_KEY_NOTIFICATION_POLICIES);
        assert_eq!(err.code, CUE_INFRA_CONFIG_PARSE_ERROR);
        assert_eq!(err.op, "extract notification policies");
        assert!(err.to_string().starts_with("CUE_INFRA_CONFIG_PARSE_ERROR: extract notification policies: "));
    }
}
