//! State machine integrity

use std::collections::{BTreeMap, BTreeSet};

use super::helpers::split_source;
use super::types::Entity;
use crate::diagnostics::{Fix, Warning, WarningSink, SEVERITY_ERROR};

pub const E_FSM_UNDEFINED_STATE: &str = "E_FSM_UNDEFINED_STATE";

/// A transition endpoint that is not among the declared states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndefinedState {
    pub from: String,
    pub to: String,
    pub state: String,
}

impl UndefinedState {
    pub fn message(&self, entity: &str) -> String {
        format!(
            "Entity '{entity}' FSM transition '{}→{}' references undefined state '{}'",
            self.from, self.to, self.state
        )
    }
}

/// Undefined states referenced by `transitions`, in transition order.
/// Nothing is reported when no states are declared.
pub fn undefined_states(states: &[String], transitions: &BTreeMap<String, Vec<String>>) -> Vec<UndefinedState> {
    if states.is_empty() {
        return Vec::new();
    }
    let declared: BTreeSet<&str> = states.iter().map(String::as_str).collect();
    let mut out = Vec::new();
    for (from, targets) in transitions {
        for to in targets {
            for state in [from, to] {
                if !declared.contains(state.as_str()) {
                    out.push(UndefinedState {
                        from: from.clone(),
                        to: to.clone(),
                        state: state.clone(),
                    });
                }
            }
        }
        if targets.is_empty() && !declared.contains(from.as_str()) {
            out.push(UndefinedState {
                from: from.clone(),
                to: String::new(),
                state: from.clone(),
            });
        }
    }
    out.dedup();
    out
}

/// Emit `E_FSM_UNDEFINED_STATE` for every entity whose transitions leave
/// the declared state set, positioned at the entity declaration. Returns the
/// number of violations.
pub fn check_fsm_integrity(entities: &[Entity], sink: &dyn WarningSink) -> usize {
    let mut count = 0;
    for entity in entities {
        let Some(fsm) = &entity.fsm else { continue };
        let source = if entity.source.is_empty() { &fsm.source } else { &entity.source };
        let (file, line) = split_source(source);
        for violation in undefined_states(&fsm.states, &fsm.transitions) {
            let mut w = Warning::new("domain", E_FSM_UNDEFINED_STATE, SEVERITY_ERROR, violation.message(&entity.name))
                .with_cue_path(format!("#{}.fsm.transitions.{}", entity.name, violation.from))
                .with_hint(format!("add '{}' to the states of {}.{}", violation.state, entity.name, fsm.field))
                .with_fix(Fix {
                    kind: "add_state".to_string(),
                    file: file.clone(),
                    cue_path: format!("#{}.fsm.states", entity.name),
                    text: format!("\"{}\"", violation.state),
                    rationale: String::new(),
                });
            w.file = file.clone();
            w.line = line;
            w.can_auto_apply = true;
            sink.warn(w);
            count += 1;
        }
    }
    count
}
