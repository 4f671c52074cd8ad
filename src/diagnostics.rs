//! Diagnostics stream
//!
//! Non-fatal findings from every stage are reported as [`Warning`] records
//! through a [`WarningSink`]. When a run has no sink, warnings land in the
//! process-wide [`LatestDiagnostics`] buffer, which is cleared at the start of
//! every pipeline run and deduplicated by `(code, message, file, line)`.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use ang_cue::Pos;

pub const SEVERITY_ERROR: &str = "error";
pub const SEVERITY_WARN: &str = "warn";
pub const SEVERITY_INFO: &str = "info";

/// Suggested source change attached to a warning
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fix {
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cue_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Warning {
    pub kind: String,
    pub code: String,
    pub severity: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub op: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub step: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub line: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub column: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cue_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docs_url: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub can_auto_apply: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_fix: Vec<Fix>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Warning {
    pub fn new(kind: &str, code: &str, severity: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            code: code.to_string(),
            severity: severity.to_string(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, pos: &Pos) -> Self {
        if pos.is_valid() {
            self.file = pos.file.clone();
            self.line = pos.line;
            self.column = pos.column;
        }
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = hint.into();
        self
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = op.into();
        self
    }

    pub fn with_cue_path(mut self, path: impl Into<String>) -> Self {
        self.cue_path = path.into();
        self
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.suggested_fix.push(fix);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity.eq_ignore_ascii_case(SEVERITY_ERROR)
    }

    fn dedupe_key(&self) -> (String, String, String, u32) {
        (self.code.clone(), self.message.clone(), self.file.clone(), self.line)
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Receiver of non-fatal diagnostics
pub trait WarningSink: Send + Sync {
    fn warn(&self, warning: Warning);
}

/// In-memory sink used by plan builds and tests
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    inner: Arc<Mutex<Vec<Warning>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.inner.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl WarningSink for CollectingSink {
    fn warn(&self, warning: Warning) {
        if let Ok(mut items) = self.inner.lock() {
            items.push(warning);
        }
    }
}

/// Keeps a copy of every warning and forwards it to the next sink, or to
/// the global buffer when there is none
pub struct TeeSink {
    local: CollectingSink,
    next: Option<Arc<dyn WarningSink>>,
}

impl TeeSink {
    pub fn new(next: Option<Arc<dyn WarningSink>>) -> Self {
        Self {
            local: CollectingSink::new(),
            next,
        }
    }

    /// Handle on the local copy; clones share storage
    pub fn collected(&self) -> CollectingSink {
        self.local.clone()
    }
}

impl WarningSink for TeeSink {
    fn warn(&self, warning: Warning) {
        self.local.warn(warning.clone());
        match &self.next {
            Some(sink) => sink.warn(warning),
            None => LatestDiagnostics::global().push(warning),
        }
    }
}

/// Process-wide compatibility buffer for runs without a sink
#[derive(Debug, Default)]
pub struct LatestDiagnostics {
    items: Mutex<Vec<Warning>>,
    seen: Mutex<BTreeSet<(String, String, String, u32)>>,
}

static LATEST: Lazy<LatestDiagnostics> = Lazy::new(LatestDiagnostics::default);

impl LatestDiagnostics {
    pub fn global() -> &'static LatestDiagnostics {
        &LATEST
    }

    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }

    pub fn push(&self, warning: Warning) {
        let fresh = self
            .seen
            .lock()
            .map(|mut seen| seen.insert(warning.dedupe_key()))
            .unwrap_or(false);
        if fresh {
            if let Ok(mut items) = self.items.lock() {
                items.push(warning);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<Warning> {
        self.items.lock().map(|w| w.clone()).unwrap_or_default()
    }
}

impl WarningSink for LatestDiagnostics {
    fn warn(&self, warning: Warning) {
        self.push(warning);
    }
}

/// Deduplicating front for one run: forwards to the configured sink or the
/// global buffer, and logs each record once
pub struct Diagnostics {
    sink: Option<Arc<dyn WarningSink>>,
    seen: Mutex<BTreeSet<(String, String, String, u32)>>,
}

impl Diagnostics {
    pub fn new(sink: Option<Arc<dyn WarningSink>>) -> Self {
        Self {
            sink,
            seen: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn report(&self, warning: Warning) {
        let fresh = self
            .seen
            .lock()
            .map(|mut seen| seen.insert(warning.dedupe_key()))
            .unwrap_or(false);
        if !fresh {
            return;
        }
        if warning.is_error() {
            tracing::warn!(code = %warning.code, file = %warning.file, line = warning.line, "{}", warning.message);
        } else {
            tracing::debug!(code = %warning.code, file = %warning.file, line = warning.line, "{}", warning.message);
        }
        match &self.sink {
            Some(sink) => sink.warn(warning),
            None => LatestDiagnostics::global().push(warning),
        }
    }
}

impl WarningSink for Diagnostics {
    fn warn(&self, warning: Warning) {
        self.report(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(line: u32) -> Warning {
        Warning::new("normalizer", "UNKNOWN_ENTITY", SEVERITY_ERROR, "unknown entity Foo").at(&Pos {
            file: "cue/api/orders.cue".into(),
            line,
            column: 3,
        })
    }

    #[test]
    fn test_diagnostics_dedupe_by_code_message_file_line() {
        let sink = CollectingSink::new();
        let diags = Diagnostics::new(Some(Arc::new(sink.clone())));
        diags.report(sample(4));
        diags.report(sample(4));
        diags.report(sample(5));
        assert_eq!(sink.warnings().len(), 2);
    }

    #[test]
    fn test_warning_serializes_without_empty_fields() {
        let w = Warning::new("doctor", "LARGE_SOURCE_FILE", SEVERITY_WARN, "big");
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "doctor", "code": "LARGE_SOURCE_FILE", "severity": "warn", "message": "big"})
        );
    }

    #[test]
    fn test_local_buffer_dedupes() {
        let buf = LatestDiagnostics::default();
        buf.push(sample(1));
        buf.push(sample(1));
        assert_eq!(buf.snapshot().len(), 1);
        buf.clear();
        assert!(buf.snapshot().is_empty());
    }
}
