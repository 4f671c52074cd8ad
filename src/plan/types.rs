//! Build plan document

use serde::{Deserialize, Serialize};

pub const PLAN_SCHEMA_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Only seen in hand-written or truncated plans; rejected by validation
    #[default]
    #[serde(rename = "")]
    Unset,
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlan {
    pub schema_version: String,
    pub plan_version: String,
    pub generated_at_utc: String,
    pub workspace_root: String,
    pub input_hash: String,
    pub compiler_hash: String,
    #[serde(default)]
    pub build_args: BuildArgs,
    #[serde(default)]
    pub preconditions: Preconditions,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub diagnostics: Vec<PlanDiagnostic>,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub changes: Vec<FileChange>,
    #[serde(default)]
    pub summary: PlanSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArgs {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend_dir: String,
    #[serde(default)]
    pub auto_apply: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compiler_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration_ms: u64,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    #[default]
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub op: ChangeOp,
    /// Workspace-relative, `/` separated
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub before_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub after_hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub before_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub after_mode: String,
    #[serde(rename = "contentB64", default, skip_serializing_if = "String::is_empty")]
    pub content_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanDiagnostic {
    pub level: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub add: usize,
    pub update: usize,
    pub delete: usize,
}

impl PlanSummary {
    pub fn of(changes: &[FileChange]) -> Self {
        let mut s = Self::default();
        for c in changes {
            match c.op {
                ChangeOp::Add => s.add += 1,
                ChangeOp::Update => s.update += 1,
                ChangeOp::Delete => s.delete += 1,
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_names() {
        let change = FileChange {
            op: ChangeOp::Add,
            path: "api/openapi.json".into(),
            before_hash: String::new(),
            after_hash: "ab".into(),
            before_mode: String::new(),
            after_mode: "0644".into(),
            content_b64: "e30K".into(),
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"op": "add", "path": "api/openapi.json", "afterHash": "ab", "afterMode": "0644", "contentB64": "e30K"})
        );

        let plan: BuildPlan = serde_json::from_str(
            r#"{"schemaVersion":"1","planVersion":"0.1.0","generatedAtUtc":"","workspaceRoot":"/w","inputHash":"","compilerHash":"","status":"warn"}"#,
        )
        .unwrap();
        assert_eq!(plan.status, PlanStatus::Warn);
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_summary_counts_per_op() {
        let change = |op| FileChange {
            op,
            path: "x".into(),
            before_hash: String::new(),
            after_hash: String::new(),
            before_mode: String::new(),
            after_mode: String::new(),
            content_b64: String::new(),
        };
        let s = PlanSummary::of(&[change(ChangeOp::Add), change(ChangeOp::Add), change(ChangeOp::Delete)]);
        assert_eq!(s, PlanSummary { add: 2, update: 0, delete: 1 });
    }
}
