//! Step registry and capability-gated execution

use std::collections::BTreeSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::artifacts::ArtifactSink;
use crate::capabilities::{Capability, CapabilitySet};
use crate::normalizer::TargetDef;

pub type StepFn = Box<dyn Fn(&mut ArtifactSink) -> anyhow::Result<()> + Send + Sync>;

/// One generation unit
pub struct Step {
    pub name: String,
    pub requires: Vec<Capability>,
    /// Identifies the output family the step owns, when any
    pub artifact_key: Option<String>,
    run: StepFn,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, requires: &[Capability], run: F) -> Self
    where
        F: Fn(&mut ArtifactSink) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            requires: requires.to_vec(),
            artifact_key: None,
            run: Box::new(run),
        }
    }

    pub fn with_artifact_key(mut self, key: impl Into<String>) -> Self {
        self.artifact_key = Some(key.into());
        self
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("requires", &self.requires)
            .field("artifact_key", &self.artifact_key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("register step: empty name")]
    EmptyName,

    #[error("register step {0:?}: duplicate step name (single active emitter path required)")]
    DuplicateName(String),

    #[error("register step {step:?}: duplicate artifact key {key:?}")]
    DuplicateArtifactKey { step: String, key: String },

    #[error("target={target} step={step}: {source}")]
    StepFailed {
        target: String,
        step: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Start,
    Ok,
    Skip,
    Error,
}

/// Structured progress record for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    pub stage: String,
    pub target: String,
    pub step: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_caps: Vec<Capability>,
    #[serde(default, skip_serializing_if = "is_zero_usize")]
    pub files_generated: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_usize(v: &usize) -> bool {
    *v == 0
}

impl StepEvent {
    fn new(target: &str, step: &str, status: StepStatus) -> Self {
        Self {
            stage: "emitters".to_string(),
            target: target.to_string(),
            step: step.to_string(),
            status,
            duration_ms: 0,
            missing_caps: Vec::new(),
            files_generated: 0,
            error: String::new(),
        }
    }
}

/// Receiver of step events
pub trait StepEventSink: Send + Sync {
    fn on_event(&self, event: &StepEvent);
}

impl<F> StepEventSink for F
where
    F: Fn(&StepEvent) + Send + Sync,
{
    fn on_event(&self, event: &StepEvent) {
        (self)(event)
    }
}

/// Ordered, uniquely named steps. The first registration error sticks and
/// later registrations are ignored.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
    names: BTreeSet<String>,
    artifact_keys: BTreeSet<String>,
    error: Option<RegistryError>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, mut step: Step) {
        if self.error.is_some() {
            return;
        }
        step.name = step.name.trim().to_string();
        if step.name.is_empty() {
            self.error = Some(RegistryError::EmptyName);
            return;
        }
        if self.names.contains(&step.name) {
            self.error = Some(RegistryError::DuplicateName(step.name));
            return;
        }
        if let Some(key) = step.artifact_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            if !self.artifact_keys.insert(key.to_string()) {
                self.error = Some(RegistryError::DuplicateArtifactKey {
                    key: key.to_string(),
                    step: step.name,
                });
                return;
            }
        }
        self.names.insert(step.name.clone());
        self.steps.push(step);
    }

    pub fn error(&self) -> Option<&RegistryError> {
        self.error.as_ref()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run steps in registration order. Steps missing a capability are
    /// skipped; the first failing step aborts the run.
    pub fn execute(
        self,
        target: &TargetDef,
        caps: &CapabilitySet,
        sink: &mut ArtifactSink,
        events: Option<&dyn StepEventSink>,
    ) -> Result<(), RegistryError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let emit = |event: StepEvent| {
            if let Some(events) = events {
                events.on_event(&event);
            }
        };

        for step in &self.steps {
            let missing = caps.missing(&step.requires);
            if !missing.is_empty() {
                let names: Vec<&str> = missing.iter().map(|c| c.as_str()).collect();
                info!(
                    "Skipping {} for target {}: missing capabilities [{}]",
                    step.name,
                    target.name,
                    names.join(", ")
                );
                let mut event = StepEvent::new(&target.name, &step.name, StepStatus::Skip);
                event.missing_caps = missing;
                emit(event);
                continue;
            }

            let start = Instant::now();
            emit(StepEvent::new(&target.name, &step.name, StepStatus::Start));
            let before = sink.len();
            let result = (step.run)(sink);
            let duration_ms = start.elapsed().as_millis() as u64;
            match result {
                Ok(()) => {
                    let mut event = StepEvent::new(&target.name, &step.name, StepStatus::Ok);
                    event.duration_ms = duration_ms;
                    event.files_generated = sink.len().saturating_sub(before);
                    debug!(step = %step.name, target = %target.name, duration_ms, "step finished");
                    emit(event);
                }
                Err(err) => {
                    let mut event = StepEvent::new(&target.name, &step.name, StepStatus::Error);
                    event.duration_ms = duration_ms;
                    event.error = err.to_string();
                    emit(event);
                    return Err(RegistryError::StepFailed {
                        target: target.name.clone(),
                        step: step.name.clone(),
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn target() -> TargetDef {
        TargetDef {
            name: "backend".into(),
            ..Default::default()
        }
    }

    fn writer(path: &'static str) -> impl Fn(&mut ArtifactSink) -> anyhow::Result<()> + Send + Sync {
        move |sink: &mut ArtifactSink| sink.write(path, "x")
    }

    #[test]
    fn test_registry_rejects_duplicates_and_keeps_first_error() {
        let mut r = StepRegistry::new();
        r.register(Step::new("Domain", &[], writer("a")));
        r.register(Step::new(" Domain ", &[], writer("b")));
        r.register(Step::new("", &[], writer("c")));
        assert_eq!(
            r.error().map(|e| e.to_string()).as_deref(),
            Some("register step \"Domain\": duplicate step name (single active emitter path required)")
        );
        assert_eq!(r.step_names(), vec!["Domain"]);
    }

    #[test]
    fn test_duplicate_artifact_key() {
        let mut r = StepRegistry::new();
        r.register(Step::new("A", &[], writer("a")).with_artifact_key("openapi"));
        r.register(Step::new("B", &[], writer("b")).with_artifact_key("openapi"));
        assert!(matches!(r.error(), Some(RegistryError::DuplicateArtifactKey { .. })));
    }

    #[test]
    fn test_execute_gates_by_capability() {
        let events = Mutex::new(Vec::new());
        let record = |e: &StepEvent| events.lock().unwrap().push(e.clone());
        let mut r = StepRegistry::new();
        r.register(Step::new("Http", &[Capability::Http], writer("http.txt")));
        r.register(Step::new("Ws", &[Capability::Ws, Capability::Auth], writer("ws.txt")));
        let caps = CapabilitySet::new([Capability::Http]);
        let mut sink = ArtifactSink::new();
        r.execute(&target(), &caps, &mut sink, Some(&record)).unwrap();

        assert_eq!(sink.paths(), vec!["http.txt"]);
        let events = events.into_inner().unwrap();
        let statuses: Vec<(String, StepStatus)> = events.iter().map(|e| (e.step.clone(), e.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("Http".to_string(), StepStatus::Start),
                ("Http".to_string(), StepStatus::Ok),
                ("Ws".to_string(), StepStatus::Skip),
            ]
        );
        assert_eq!(events[1].files_generated, 1);
        assert_eq!(events[2].missing_caps, vec![Capability::Ws, Capability::Auth]);
    }

    #[test]
    fn test_failure_stops_run_with_target_and_step() {
        let mut r = StepRegistry::new();
        r.register(Step::new("Broken", &[], |_: &mut ArtifactSink| anyhow::bail!("boom")));
        r.register(Step::new("Later", &[], writer("later")));
        let mut sink = ArtifactSink::new();
        let err = r
            .execute(&target(), &CapabilitySet::default(), &mut sink, None)
            .unwrap_err();
        assert_eq!(err.to_string(), "target=backend step=Broken: boom");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_event_json_omits_empty_fields() {
        let event = StepEvent::new("backend", "Domain", StepStatus::Start);
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"stage":"emitters","target":"backend","step":"Domain","status":"start"}"#
        );
    }
}
