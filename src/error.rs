//! Stage-scoped error envelope
//!
//! Every failure that crosses a pipeline stage boundary is wrapped in a
//! [`ContractError`] carrying the stage, a stable code from the closed
//! registry below, and the operation that failed. Rendering follows
//! `[Stage:Code] Op: cause`, which is what build logs and the doctor parse.

use std::fmt;

/// Pipeline stage that produced a [`ContractError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Cue,
    Ir,
    Transformers,
    Emitters,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Cue => "CUE",
            Stage::Ir => "IR",
            Stage::Transformers => "TRANSFORMERS",
            Stage::Emitters => "EMITTERS",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Stable codes
// ============================================================================

pub const CUE_DOMAIN_LOAD_ERROR: &str = "CUE_DOMAIN_LOAD_ERROR";
pub const CUE_ARCH_LOAD_ERROR: &str = "CUE_ARCH_LOAD_ERROR";
pub const CUE_API_LOAD_ERROR: &str = "CUE_API_LOAD_ERROR";
pub const CUE_ENTITY_NORMALIZE_ERROR: &str = "CUE_ENTITY_NORMALIZE_ERROR";
pub const CUE_SERVICE_NORMALIZE_ERROR: &str = "CUE_SERVICE_NORMALIZE_ERROR";
pub const CUE_ENDPOINT_NORMALIZE_ERROR: &str = "CUE_ENDPOINT_NORMALIZE_ERROR";
pub const CUE_REPO_NORMALIZE_ERROR: &str = "CUE_REPO_NORMALIZE_ERROR";
pub const CUE_SCHEDULE_NORMALIZE_ERROR: &str = "CUE_SCHEDULE_NORMALIZE_ERROR";
pub const CUE_PIPELINE_ERROR: &str = "CUE_PIPELINE_ERROR";
pub const CUE_INFRA_LOAD_ERROR: &str = "CUE_INFRA_LOAD_ERROR";
pub const CUE_INFRA_CONFIG_PARSE_ERROR: &str = "CUE_INFRA_CONFIG_PARSE_ERROR";
pub const CUE_INFRA_AUTH_PARSE_ERROR: &str = "CUE_INFRA_AUTH_PARSE_ERROR";
pub const CUE_RBAC_LOAD_ERROR: &str = "CUE_RBAC_LOAD_ERROR";
pub const CUE_RBAC_PARSE_ERROR: &str = "CUE_RBAC_PARSE_ERROR";
pub const CUE_POLICIES_LOAD_ERROR: &str = "CUE_POLICIES_LOAD_ERROR";
pub const CUE_POLICIES_PARSE_ERROR: &str = "CUE_POLICIES_PARSE_ERROR";
pub const CUE_VIEWS_LOAD_ERROR: &str = "CUE_VIEWS_LOAD_ERROR";
pub const CUE_VIEWS_PARSE_ERROR: &str = "CUE_VIEWS_PARSE_ERROR";
pub const CUE_PROJECT_LOAD_ERROR: &str = "CUE_PROJECT_LOAD_ERROR";
pub const CUE_PROJECT_PARSE_ERROR: &str = "CUE_PROJECT_PARSE_ERROR";
pub const CUE_TARGETS_PARSE_ERROR: &str = "CUE_TARGETS_PARSE_ERROR";
pub const CUE_LINT_LOAD_ERROR: &str = "CUE_LINT_LOAD_ERROR";
pub const CUE_POLICY_VALIDATE_ERROR: &str = "CUE_POLICY_VALIDATE_ERROR";
pub const CUE_POLICY_LOAD_ERROR: &str = "CUE_POLICY_LOAD_ERROR";
pub const CUE_TEST_COVERAGE_PIPELINE_ERROR: &str = "CUE_TEST_COVERAGE_PIPELINE_ERROR";

pub const IR_CONVERT_TRANSFORM_ERROR: &str = "IR_CONVERT_TRANSFORM_ERROR";
pub const IR_SERVICE_DEPENDENCY_ERROR: &str = "IR_SERVICE_DEPENDENCY_ERROR";
pub const IR_VERSION_MIGRATION_ERROR: &str = "IR_VERSION_MIGRATION_ERROR";
pub const IR_SEMANTIC_VALIDATE_ERROR: &str = "IR_SEMANTIC_VALIDATE_ERROR";

pub const TRANSFORMER_APPLY_ERROR: &str = "TRANSFORMER_APPLY_ERROR";
pub const HOOK_PROCESS_ERROR: &str = "HOOK_PROCESS_ERROR";

pub const EMITTER_OPTIONS_ERROR: &str = "EMITTER_OPTIONS_ERROR";
pub const EMITTER_STEP_ERROR: &str = "EMITTER_STEP_ERROR";
pub const EMITTER_MCP_GENERATION_ERROR: &str = "EMITTER_MCP_GENERATION_ERROR";
pub const EMITTER_CAPABILITY_RESOLVE_ERROR: &str = "EMITTER_CAPABILITY_RESOLVE_ERROR";

/// Closed registry of codes a [`ContractError`] may carry
pub const STABLE_ERROR_CODES: &[&str] = &[
    CUE_DOMAIN_LOAD_ERROR,
    CUE_ARCH_LOAD_ERROR,
    CUE_API_LOAD_ERROR,
    CUE_ENTITY_NORMALIZE_ERROR,
    CUE_SERVICE_NORMALIZE_ERROR,
    CUE_ENDPOINT_NORMALIZE_ERROR,
    CUE_REPO_NORMALIZE_ERROR,
    CUE_SCHEDULE_NORMALIZE_ERROR,
    CUE_PIPELINE_ERROR,
    CUE_INFRA_LOAD_ERROR,
    CUE_INFRA_CONFIG_PARSE_ERROR,
    CUE_INFRA_AUTH_PARSE_ERROR,
    CUE_RBAC_LOAD_ERROR,
    CUE_RBAC_PARSE_ERROR,
    CUE_POLICIES_LOAD_ERROR,
    CUE_POLICIES_PARSE_ERROR,
    CUE_VIEWS_LOAD_ERROR,
    CUE_VIEWS_PARSE_ERROR,
    CUE_PROJECT_LOAD_ERROR,
    CUE_PROJECT_PARSE_ERROR,
    CUE_TARGETS_PARSE_ERROR,
    CUE_LINT_LOAD_ERROR,
    CUE_POLICY_VALIDATE_ERROR,
    CUE_POLICY_LOAD_ERROR,
    CUE_TEST_COVERAGE_PIPELINE_ERROR,
    IR_CONVERT_TRANSFORM_ERROR,
    IR_SERVICE_DEPENDENCY_ERROR,
    IR_VERSION_MIGRATION_ERROR,
    IR_SEMANTIC_VALIDATE_ERROR,
    TRANSFORMER_APPLY_ERROR,
    HOOK_PROCESS_ERROR,
    EMITTER_OPTIONS_ERROR,
    EMITTER_STEP_ERROR,
    EMITTER_MCP_GENERATION_ERROR,
    EMITTER_CAPABILITY_RESOLVE_ERROR,
];

pub fn is_stable_code(code: &str) -> bool {
    STABLE_ERROR_CODES.contains(&code)
}

// ============================================================================
// Envelope
// ============================================================================

/// Typed, coded failure of one pipeline stage
#[derive(Debug)]
pub struct ContractError {
    pub stage: Stage,
    pub code: &'static str,
    pub op: String,
    pub source: anyhow::Error,
}

impl std::error::Error for ContractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.is_empty() {
            write!(f, "[{}:{}] {}", self.stage, self.code, self.source)
        } else {
            write!(f, "[{}:{}] {}: {}", self.stage, self.code, self.op, self.source)
        }
    }
}

impl ContractError {
    pub fn new(
        stage: Stage,
        code: &'static str,
        op: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            stage,
            code,
            op: op.into(),
            source: source.into(),
        }
    }

    /// Innermost cause, skipping the envelope itself
    pub fn root_cause(&self) -> &(dyn std::error::Error + 'static) {
        self.source.root_cause()
    }
}

/// Wrap a stage failure, leaving an already-wrapped [`ContractError`] as is
pub fn wrap_contract_error(
    stage: Stage,
    code: &'static str,
    op: impl Into<String>,
    err: impl Into<anyhow::Error>,
) -> ContractError {
    let err = err.into();
    match err.downcast::<ContractError>() {
        Ok(existing) => existing,
        Err(other) => ContractError::new(stage, code, op, other),
    }
}

/// Stage wrappers used by the pipeline
pub fn cue_error(code: &'static str, op: impl Into<String>, err: impl Into<anyhow::Error>) -> ContractError {
    wrap_contract_error(Stage::Cue, code, op, err)
}

pub fn ir_error(code: &'static str, op: impl Into<String>, err: impl Into<anyhow::Error>) -> ContractError {
    wrap_contract_error(Stage::Ir, code, op, err)
}

pub fn transformer_error(
    code: &'static str,
    op: impl Into<String>,
    err: impl Into<anyhow::Error>,
) -> ContractError {
    wrap_contract_error(Stage::Transformers, code, op, err)
}

pub fn emitter_error(code: &'static str, op: impl Into<String>, err: impl Into<anyhow::Error>) -> ContractError {
    wrap_contract_error(Stage::Emitters, code, op, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::error::Error as _;

    #[test]
    fn test_stable_codes_unique_and_non_empty() {
        let mut seen = HashSet::new();
        for code in STABLE_ERROR_CODES {
            assert!(!code.trim().is_empty());
            assert!(seen.insert(*code), "duplicate code {code}");
        }
        assert_eq!(seen.len(), 35);
    }

    #[test]
    fn test_display_with_and_without_op() {
        let err = ContractError::new(Stage::Cue, CUE_DOMAIN_LOAD_ERROR, "LoadDomain", anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "[CUE:CUE_DOMAIN_LOAD_ERROR] LoadDomain: boom");

        let err = ContractError::new(Stage::Emitters, EMITTER_STEP_ERROR, "", anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "[EMITTERS:EMITTER_STEP_ERROR] boom");
    }

    #[test]
    fn test_source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.cue");
        let err = ir_error(IR_CONVERT_TRANSFORM_ERROR, "Convert", anyhow::Error::new(io).context("reading"));
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("reading"));
        assert_eq!(err.root_cause().to_string(), "missing.cue");
    }

    #[test]
    fn test_wrap_keeps_existing_envelope() {
        let inner = ContractError::new(Stage::Ir, IR_SEMANTIC_VALIDATE_ERROR, "Validate", anyhow::anyhow!("x"));
        let wrapped = wrap_contract_error(Stage::Emitters, EMITTER_STEP_ERROR, "Emit", inner);
        assert_eq!(wrapped.code, IR_SEMANTIC_VALIDATE_ERROR);
        assert_eq!(wrapped.stage, Stage::Ir);
    }
}
