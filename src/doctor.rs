//! Doctor: maps stable error codes found in a build log to fixes
//!
//! The analyzer remembers which codes were open on the previous run in
//! `.ang/doctor_state.json` so it can report progress across iterations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{self, STABLE_ERROR_CODES};

pub const E_FSM_UNDEFINED_STATE: &str = "E_FSM_UNDEFINED_STATE";

static CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(E_[A-Z0-9_]+|[A-Z]+_[A-Z0-9_]*_ERROR)\b").expect("valid regex"));
static FSM_TRANSITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Entity '([^']+)' FSM transition '[^']*' references undefined state '([^']+)'").expect("valid regex")
});
static FSM_STATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"undefined state '([^']+)'").expect("valid regex"));
static CUE_LOCATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"at (cue/[^:\s]+):(\d+):\d+").expect("valid regex"));

/// Merge request a fix can be applied with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchTemplate {
    pub path: String,
    pub selector: String,
    pub forced_merge: bool,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub code: String,
    pub fix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchTemplate>,
    pub can_auto_apply: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoFix {
    pub code: String,
    pub fix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchTemplate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorState {
    pub iteration: u32,
    #[serde(default)]
    pub open_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorReport {
    pub status: String,
    pub iteration: u32,
    pub errors_fixed: usize,
    pub errors_remaining: usize,
    pub detected_codes: Vec<String>,
    pub auto_fixable: Vec<AutoFix>,
    pub suggestions: Vec<Suggestion>,
    pub catalog_total: usize,
    pub catalog: Vec<Suggestion>,
}

/// Known codes in `log`, sorted and unique
pub fn detect_error_codes(log: &str) -> Vec<String> {
    let found: BTreeSet<&str> = CODE_RE
        .find_iter(log)
        .map(|m| m.as_str())
        .filter(|c| *c == E_FSM_UNDEFINED_STATE || error::is_stable_code(c))
        .collect();
    found.into_iter().map(str::to_string).collect()
}

/// One suggestion per known code, in code order
pub fn suggestion_catalog(log: &str) -> Vec<Suggestion> {
    let mut codes: Vec<&str> = STABLE_ERROR_CODES.to_vec();
    codes.push(E_FSM_UNDEFINED_STATE);
    codes.sort_unstable();
    codes.dedup();
    codes.into_iter().map(|c| suggestion_for(c, log)).collect()
}

struct FsmLocation {
    path: String,
    entity: String,
    state: String,
}

fn parse_fsm_location(log: &str) -> FsmLocation {
    let (mut entity, mut state) = match FSM_TRANSITION_RE.captures(log) {
        Some(c) => (c[1].to_string(), c[2].to_string()),
        None => (String::new(), String::new()),
    };
    if state.is_empty() {
        if let Some(c) = FSM_STATE_RE.captures(log) {
            state = c[1].to_string();
        }
    }
    let path = CUE_LOCATION_RE
        .captures(log)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "cue/domain/order.cue".to_string());
    if entity.is_empty() {
        entity = "Order".into();
    }
    if state.is_empty() {
        state = "paid".into();
    }
    FsmLocation { path, entity, state }
}

/// Source file most likely to hold the fix for a code family
fn source_for(code: &str) -> &'static str {
    match code {
        error::CUE_ARCH_LOAD_ERROR | error::CUE_SERVICE_NORMALIZE_ERROR => "cue/architecture/services.cue",
        error::CUE_API_LOAD_ERROR | error::CUE_ENDPOINT_NORMALIZE_ERROR => "cue/api/http.cue",
        error::CUE_SCHEDULE_NORMALIZE_ERROR => "cue/api/schedules.cue",
        error::CUE_REPO_NORMALIZE_ERROR => "cue/repo/repositories.cue",
        error::CUE_VIEWS_LOAD_ERROR | error::CUE_VIEWS_PARSE_ERROR => "cue/views/views.cue",
        error::CUE_INFRA_LOAD_ERROR | error::CUE_INFRA_CONFIG_PARSE_ERROR | error::CUE_INFRA_AUTH_PARSE_ERROR => {
            "cue/infra/infra.cue"
        }
        error::CUE_RBAC_LOAD_ERROR | error::CUE_RBAC_PARSE_ERROR => "cue/rbac/rbac.cue",
        error::CUE_POLICIES_LOAD_ERROR
        | error::CUE_POLICIES_PARSE_ERROR
        | error::CUE_POLICY_LOAD_ERROR
        | error::CUE_POLICY_VALIDATE_ERROR => "cue/policies/policies.cue",
        error::CUE_PROJECT_LOAD_ERROR
        | error::CUE_PROJECT_PARSE_ERROR
        | error::CUE_TARGETS_PARSE_ERROR
        | error::EMITTER_OPTIONS_ERROR
        | error::EMITTER_STEP_ERROR
        | error::EMITTER_CAPABILITY_RESOLVE_ERROR
        | error::EMITTER_MCP_GENERATION_ERROR => "cue/project/project.cue",
        _ => "cue/domain/entities.cue",
    }
}

fn template(code: &str) -> PatchTemplate {
    PatchTemplate {
        path: source_for(code).to_string(),
        selector: String::new(),
        forced_merge: false,
        content: format!("// TODO: fix {code} in this CUE file and re-run build.\n"),
    }
}

fn fix_text(code: &str) -> &'static str {
    match code {
        error::CUE_DOMAIN_LOAD_ERROR | error::CUE_ENTITY_NORMALIZE_ERROR => {
            "Fix CUE syntax or type conflicts in domain models."
        }
        error::CUE_ARCH_LOAD_ERROR | error::CUE_SERVICE_NORMALIZE_ERROR => "Fix CUE syntax in architecture definitions.",
        error::CUE_API_LOAD_ERROR | error::CUE_ENDPOINT_NORMALIZE_ERROR => {
            "Fix CUE syntax in API operations/endpoints."
        }
        error::CUE_REPO_NORMALIZE_ERROR => "Fix repository schema: finder fields, returns/select compatibility.",
        error::CUE_SCHEDULE_NORMALIZE_ERROR => "Fix schedule definitions: service, action and cron/at fields.",
        error::CUE_TARGETS_PARSE_ERROR | error::CUE_PROJECT_PARSE_ERROR | error::CUE_PROJECT_LOAD_ERROR => {
            "Fix target/project schema in cue/project."
        }
        error::CUE_VIEWS_LOAD_ERROR | error::CUE_VIEWS_PARSE_ERROR => {
            "Fix view definitions and referenced entities/fields."
        }
        error::CUE_POLICY_LOAD_ERROR
        | error::CUE_POLICY_VALIDATE_ERROR
        | error::CUE_POLICIES_LOAD_ERROR
        | error::CUE_POLICIES_PARSE_ERROR => "Fix policy file syntax/constraints under cue/policies.",
        error::CUE_INFRA_LOAD_ERROR | error::CUE_INFRA_CONFIG_PARSE_ERROR | error::CUE_INFRA_AUTH_PARSE_ERROR => {
            "Fix infra values (config, auth, notifications) under cue/infra."
        }
        error::EMITTER_CAPABILITY_RESOLVE_ERROR => "Adjust target capabilities (lang/framework/db) in cue/project.",
        error::EMITTER_STEP_ERROR => {
            "Inspect failing emitter step and fix upstream CUE intent causing invalid generation context."
        }
        error::IR_SERVICE_DEPENDENCY_ERROR => "Break the service dependency cycle in architecture `uses`.",
        _ => "Inspect error details and patch related CUE source; then re-run build.",
    }
}

pub fn suggestion_for(code: &str, log: &str) -> Suggestion {
    if code == E_FSM_UNDEFINED_STATE {
        let loc = parse_fsm_location(log);
        return Suggestion {
            code: code.to_string(),
            fix: format!("Add '{}' to {}.fsm.states.", loc.state, loc.entity),
            patch: Some(PatchTemplate {
                path: loc.path,
                selector: String::new(),
                forced_merge: false,
                content: format!("// Add state '{}' to fsm.states for entity {}.\n", loc.state, loc.entity),
            }),
            can_auto_apply: true,
        };
    }
    Suggestion {
        code: code.to_string(),
        fix: fix_text(code).to_string(),
        patch: Some(template(code)),
        can_auto_apply: false,
    }
}

pub struct Analyzer {
    state_path: PathBuf,
}

impl Analyzer {
    pub fn new(project_root: &Path) -> Self {
        Self {
            state_path: project_root.join(".ang").join("doctor_state.json"),
        }
    }

    pub fn analyze(&self, log: &str) -> DoctorReport {
        let codes = detect_error_codes(log);
        let catalog = suggestion_catalog(log);

        let prev = self.load_state();
        let next = next_state(&prev, &codes);
        let errors_fixed = prev.open_codes.iter().filter(|c| !codes.contains(c)).count();
        self.save_state(&next);

        let suggestions: Vec<Suggestion> = codes.iter().map(|c| suggestion_for(c, log)).collect();
        let auto_fixable = suggestions
            .iter()
            .filter(|s| s.can_auto_apply)
            .map(|s| AutoFix {
                code: s.code.clone(),
                fix: s.fix.clone(),
                patch: s.patch.clone(),
            })
            .collect();
        debug!(iteration = next.iteration, detected = codes.len(), errors_fixed, "doctor analyzed log");

        DoctorReport {
            status: "Analyzed".into(),
            iteration: next.iteration,
            errors_fixed,
            errors_remaining: codes.len(),
            detected_codes: codes,
            auto_fixable,
            suggestions,
            catalog_total: catalog.len(),
            catalog,
        }
    }

    fn load_state(&self) -> DoctorState {
        let Ok(data) = std::fs::read(&self.state_path) else {
            return DoctorState::default();
        };
        let mut state: DoctorState = serde_json::from_slice(&data).unwrap_or_default();
        state.open_codes = unique_sorted(std::mem::take(&mut state.open_codes));
        state
    }

    /// Best effort; a lost state only resets the iteration count
    fn save_state(&self, state: &DoctorState) {
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = self.state_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.state_path, serde_json::to_vec_pretty(state)?)?;
            Ok(())
        })();
        if let Err(e) = result {
            warn!(path = %self.state_path.display(), error = %e, "failed to persist doctor state");
        }
    }
}

fn unique_sorted(codes: Vec<String>) -> Vec<String> {
    codes
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn next_state(prev: &DoctorState, current: &[String]) -> DoctorState {
    let iteration = if prev.iteration == 0 && !current.is_empty() {
        1
    } else if prev.open_codes != current {
        prev.iteration + 1
    } else {
        prev.iteration
    };
    DoctorState {
        iteration,
        open_codes: current.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FSM_LOG: &str = "[CUE:CUE_DOMAIN_LOAD_ERROR] E_FSM_UNDEFINED_STATE: Entity 'Invoice' FSM transition 'pay' \
                           references undefined state 'settled' at cue/domain/invoice.cue:14:3";

    #[test]
    fn test_detect_keeps_only_known_codes() {
        let log = "EMITTER_STEP_ERROR then FOO_BAR_ERROR and E_FSM_UNDEFINED_STATE, again EMITTER_STEP_ERROR";
        assert_eq!(detect_error_codes(log), vec!["EMITTER_STEP_ERROR", "E_FSM_UNDEFINED_STATE"]);
        assert!(detect_error_codes("all good").is_empty());
    }

    #[test]
    fn test_fsm_suggestion_reads_location() {
        let s = suggestion_for(E_FSM_UNDEFINED_STATE, FSM_LOG);
        assert!(s.can_auto_apply);
        assert_eq!(s.fix, "Add 'settled' to Invoice.fsm.states.");
        assert_eq!(s.patch.unwrap().path, "cue/domain/invoice.cue");
    }

    #[test]
    fn test_catalog_covers_every_code() {
        let catalog = suggestion_catalog("");
        assert_eq!(catalog.len(), STABLE_ERROR_CODES.len() + 1);
        let project = catalog.iter().find(|s| s.code == error::EMITTER_CAPABILITY_RESOLVE_ERROR).unwrap();
        assert_eq!(project.patch.as_ref().unwrap().path, "cue/project/project.cue");
        assert!(catalog.iter().filter(|s| s.can_auto_apply).count() == 1);
    }

    #[test]
    fn test_iterations_track_progress() {
        let dir = tempfile::tempdir().unwrap();
        let doctor = Analyzer::new(dir.path());

        let first = doctor.analyze(FSM_LOG);
        assert_eq!(first.iteration, 1);
        assert_eq!(first.detected_codes, vec!["CUE_DOMAIN_LOAD_ERROR", "E_FSM_UNDEFINED_STATE"]);
        assert_eq!(first.auto_fixable.len(), 1);

        let same = doctor.analyze(FSM_LOG);
        assert_eq!(same.iteration, 1);
        assert_eq!(same.errors_fixed, 0);

        let better = doctor.analyze("CUE_DOMAIN_LOAD_ERROR");
        assert_eq!(better.iteration, 2);
        assert_eq!(better.errors_fixed, 1);
        assert_eq!(better.errors_remaining, 1);

        let clean = doctor.analyze("");
        assert_eq!(clean.iteration, 3);
        assert_eq!(clean.errors_fixed, 1);

        let raw = std::fs::read_to_string(dir.path().join(".ang/doctor_state.json")).unwrap();
        let state: DoctorState = serde_json::from_str(&raw).unwrap();
        assert_eq!(state, DoctorState { iteration: 3, open_codes: vec![] });
    }
}
