use super::{BuildPlan, PlanError, PlanStatus, PLAN_SCHEMA_VERSION};

/// Structural checks shared by read, write and apply
pub fn validate_plan(plan: Option<&BuildPlan>) -> Result<(), PlanError> {
    let plan = plan.ok_or(PlanError::Nil)?;
    let schema = plan.schema_version.trim();
    if schema.is_empty() {
        return Err(PlanError::MissingSchemaVersion);
    }
    if schema != PLAN_SCHEMA_VERSION {
        return Err(PlanError::UnsupportedSchemaVersion(schema.to_string()));
    }
    if plan.plan_version.trim().is_empty() {
        return Err(PlanError::MissingPlanVersion);
    }
    if plan.workspace_root.trim().is_empty() {
        return Err(PlanError::MissingWorkspaceRoot);
    }
    if plan.status == PlanStatus::Unset {
        return Err(PlanError::MissingStatus);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> BuildPlan {
        BuildPlan {
            schema_version: "1".into(),
            plan_version: "0.1.0".into(),
            workspace_root: "/work".into(),
            status: PlanStatus::Ok,
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_messages_in_order() {
        assert_eq!(validate_plan(None).unwrap_err().to_string(), "plan is nil");
        assert!(validate_plan(Some(&valid())).is_ok());

        let cases: Vec<(fn(&mut BuildPlan), &str)> = vec![
            (|p| p.schema_version.clear(), "schemaVersion is required"),
            (|p| p.schema_version = "2".into(), "unsupported schemaVersion: 2"),
            (|p| p.plan_version = "  ".into(), "planVersion is required"),
            (|p| p.workspace_root.clear(), "workspaceRoot is required"),
            (|p| p.status = PlanStatus::Unset, "status is required"),
        ];
        for (mutate, want) in cases {
            let mut p = valid();
            mutate(&mut p);
            assert_eq!(validate_plan(Some(&p)).unwrap_err().to_string(), want);
        }
    }
}
