use std::path::Path;

use super::{validate_plan, BuildPlan, PlanError};

/// Validate, then write pretty JSON with a trailing newline, creating parent
/// directories
pub fn write_plan(path: &Path, plan: &BuildPlan) -> Result<(), PlanError> {
    validate_plan(Some(plan))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PlanError::io("mkdir", parent, e))?;
    }
    let mut data = serde_json::to_vec_pretty(plan)?;
    data.push(b'\n');
    std::fs::write(path, data).map_err(|e| PlanError::io("write", path, e))
}

/// Parse and validate; a JSON `null` document is a nil plan
pub fn read_plan(path: &Path) -> Result<BuildPlan, PlanError> {
    let data = std::fs::read(path).map_err(|e| PlanError::io("read", path, e))?;
    let plan: Option<BuildPlan> = serde_json::from_slice(&data)?;
    validate_plan(plan.as_ref())?;
    plan.ok_or(PlanError::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ChangeOp, FileChange, PlanDiagnostic, PlanStatus, PlanSummary};
    use pretty_assertions::assert_eq;

    fn sample() -> BuildPlan {
        let changes = vec![FileChange {
            op: ChangeOp::Update,
            path: "api/openapi.json".into(),
            before_hash: "aa".into(),
            after_hash: "bb".into(),
            before_mode: "0644".into(),
            after_mode: "0644".into(),
            content_b64: "e30K".into(),
        }];
        BuildPlan {
            schema_version: "1".into(),
            plan_version: "0.1.0".into(),
            generated_at_utc: "2026-01-01T00:00:00Z".into(),
            workspace_root: "/work".into(),
            input_hash: "abc".into(),
            compiler_hash: "def".into(),
            status: PlanStatus::Warn,
            diagnostics: vec![PlanDiagnostic {
                level: "warn".into(),
                code: "LARGE_SOURCE_FILE".into(),
                message: "big".into(),
                file: "cue/domain/a.cue".into(),
                line: 1,
            }],
            summary: PlanSummary::of(&changes),
            changes,
            ..Default::default()
        }
    }

    #[test]
    fn test_write_then_read_is_equal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ang/plans/plan.json");
        let plan = sample();
        write_plan(&path, &plan).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("}\n"));
        assert!(raw.contains("\n  \"schemaVersion\": \"1\""));
        assert_eq!(read_plan(&path).unwrap(), plan);
    }

    #[test]
    fn test_write_rejects_invalid_plan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        let mut plan = sample();
        plan.schema_version = "9".into();
        assert_eq!(write_plan(&path, &plan).unwrap_err().to_string(), "unsupported schemaVersion: 9");
        assert!(!path.exists());
    }

    #[test]
    fn test_read_null_and_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, "null").unwrap();
        assert_eq!(read_plan(&path).unwrap_err().to_string(), "plan is nil");

        let mut json = serde_json::to_value(sample()).unwrap();
        json["schemaVersion"] = "2".into();
        std::fs::write(&path, json.to_string()).unwrap();
        assert_eq!(read_plan(&path).unwrap_err().to_string(), "unsupported schemaVersion: 2");
    }
}
