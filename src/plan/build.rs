use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info};

use super::hash::{compiler_hash, input_hash, sha256_hex, workspace_hash};
use super::{BuildArgs, BuildPlan, ChangeOp, FileChange, PlanDiagnostic, PlanError, PlanStatus, PlanStep, PlanSummary, Preconditions, PLAN_SCHEMA_VERSION};
use crate::config::CompilerConfig;
use crate::diagnostics::{TeeSink, Warning, WarningSink, SEVERITY_WARN};
use crate::generator::manifest::read_manifest;
use crate::generator::ArtifactSink;
use crate::pipeline::{compile, PipelineOptions};

pub const PIPELINE_ERROR: &str = "PIPELINE_ERROR";

#[derive(Clone, Default)]
pub struct PlanOptions {
    pub warning_sink: Option<Arc<dyn WarningSink>>,
    pub config: Option<CompilerConfig>,
    pub target: String,
    pub mode: String,
    pub auto_apply: bool,
}

fn to_plan_diagnostic(w: &Warning) -> PlanDiagnostic {
    let level = w.severity.trim().to_lowercase();
    PlanDiagnostic {
        level: if level.is_empty() { SEVERITY_WARN.to_string() } else { level },
        code: w.code.clone(),
        message: w.message.clone(),
        file: w.file.clone(),
        line: w.line,
    }
}

fn format_mode(mode: u32) -> String {
    format!("{:04o}", mode & 0o7777)
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(_: &std::fs::Metadata) -> u32 {
    crate::generator::artifacts::DEFAULT_FILE_MODE
}

/// Workspace-relative path of an artifact written under `out_dir`
fn workspace_path(out_dir: &str, artifact: &str) -> String {
    let dir = out_dir.trim().trim_matches('/');
    if dir.is_empty() || dir == "." {
        artifact.to_string()
    } else {
        format!("{dir}/{artifact}")
    }
}

/// Artifact path of a workspace-relative path, if it lies under `out_dir`
pub(super) fn artifact_path<'a>(out_dir: &str, rel: &'a str) -> Option<&'a str> {
    let dir = out_dir.trim().trim_matches('/');
    if dir.is_empty() || dir == "." {
        return Some(rel);
    }
    rel.strip_prefix(dir).and_then(|r| r.strip_prefix('/'))
}

/// Diff staged artifacts against the files on disk. Artifacts recorded in
/// the previous manifest but no longer produced become deletions.
pub(super) fn diff_artifacts(root: &Path, out_dir: &str, artifacts: &ArtifactSink) -> Result<Vec<FileChange>, PlanError> {
    let mut changes = Vec::new();
    let mut produced = BTreeSet::new();
    for a in artifacts.iter() {
        let rel = workspace_path(out_dir, &a.path);
        produced.insert(rel.clone());
        let path = root.join(&rel);
        let after_hash = sha256_hex(&a.content);
        let mut change = FileChange {
            op: ChangeOp::Add,
            path: rel,
            before_hash: String::new(),
            after_hash,
            before_mode: String::new(),
            after_mode: format_mode(a.mode),
            content_b64: STANDARD.encode(&a.content),
        };
        if path.is_file() {
            let before = std::fs::read(&path).map_err(|e| PlanError::io("read", &path, e))?;
            let before_hash = sha256_hex(&before);
            if before_hash == change.after_hash {
                continue;
            }
            let meta = std::fs::metadata(&path).map_err(|e| PlanError::io("stat", &path, e))?;
            change.op = ChangeOp::Update;
            change.before_hash = before_hash;
            change.before_mode = format_mode(file_mode(&meta));
        }
        changes.push(change);
    }

    if let Ok(previous) = read_manifest(root) {
        for record in previous.artifacts {
            let rel = workspace_path(out_dir, &record.path);
            if produced.contains(&rel) {
                continue;
            }
            let path = root.join(&rel);
            if !path.is_file() {
                continue;
            }
            let before = std::fs::read(&path).map_err(|e| PlanError::io("read", &path, e))?;
            let meta = std::fs::metadata(&path).map_err(|e| PlanError::io("stat", &path, e))?;
            changes.push(FileChange {
                op: ChangeOp::Delete,
                path: rel,
                before_hash: sha256_hex(&before),
                after_hash: String::new(),
                before_mode: format_mode(file_mode(&meta)),
                after_mode: String::new(),
                content_b64: String::new(),
            });
        }
    }
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(changes)
}

/// Run the pipeline without touching the workspace and describe what a
/// build would change
pub fn build_plan(root: &Path, opts: &PlanOptions) -> Result<BuildPlan, PlanError> {
    let start = Instant::now();
    let config = match &opts.config {
        Some(cfg) => cfg.clone(),
        None => CompilerConfig::load(root)?,
    };

    let mut plan = BuildPlan {
        schema_version: PLAN_SCHEMA_VERSION.to_string(),
        plan_version: crate::COMPILER_VERSION.to_string(),
        generated_at_utc: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        workspace_root: root.display().to_string(),
        input_hash: input_hash(&root.join(&config.cue_root))?,
        compiler_hash: compiler_hash(),
        build_args: BuildArgs {
            target: opts.target.clone(),
            mode: opts.mode.clone(),
            backend_dir: config.output.backend_dir.clone(),
            auto_apply: opts.auto_apply,
        },
        preconditions: Preconditions {
            workspace_hash: if root.is_dir() { workspace_hash(root)? } else { String::new() },
            compiler_version: crate::COMPILER_VERSION.to_string(),
        },
        status: PlanStatus::Ok,
        ..Default::default()
    };

    let tee = TeeSink::new(opts.warning_sink.clone());
    let collected = tee.collected();
    let pipeline_opts = PipelineOptions {
        warning_sink: Some(Arc::new(tee)),
        config: Some(config.clone()),
        ..Default::default()
    };
    let result = compile(root, &pipeline_opts);
    let compile_ms = start.elapsed().as_millis() as u64;

    for w in collected.warnings() {
        plan.diagnostics.push(to_plan_diagnostic(&w));
        if w.is_error() {
            plan.status = PlanStatus::Fail;
        } else if plan.status == PlanStatus::Ok {
            plan.status = PlanStatus::Warn;
        }
    }

    match result {
        Ok(output) => {
            plan.steps.push(PlanStep {
                name: "parse+normalize+ir".into(),
                duration_ms: compile_ms,
                status: "ok".into(),
                message: String::new(),
            });
            let diff_start = Instant::now();
            plan.changes = diff_artifacts(root, &config.output.dir, &output.artifacts)?;
            plan.steps.push(PlanStep {
                name: "diff".into(),
                duration_ms: diff_start.elapsed().as_millis() as u64,
                status: "ok".into(),
                message: format!("{} artifact(s) staged", output.artifacts.len()),
            });
        }
        Err(err) => {
            debug!(error = %err, "pipeline failed during plan");
            plan.diagnostics.push(PlanDiagnostic {
                level: "error".into(),
                code: PIPELINE_ERROR.into(),
                message: err.to_string(),
                file: String::new(),
                line: 0,
            });
            plan.status = PlanStatus::Fail;
            plan.steps.push(PlanStep {
                name: "parse+normalize+ir".into(),
                duration_ms: compile_ms,
                status: "fail".into(),
                message: err.code.to_string(),
            });
            plan.steps.push(PlanStep {
                name: "diff".into(),
                duration_ms: 0,
                status: "skip".into(),
                message: String::new(),
            });
        }
    }

    plan.summary = PlanSummary::of(&plan.changes);
    info!(
        status = ?plan.status,
        add = plan.summary.add,
        update = plan.summary.update,
        delete = plan.summary.delete,
        "plan built"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{write_manifest, ArtifactManifest};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_workspace_path_under_output_dir() {
        assert_eq!(workspace_path(".", "api/openapi.json"), "api/openapi.json");
        assert_eq!(workspace_path("gen/", "api/openapi.json"), "gen/api/openapi.json");
        assert_eq!(format_mode(0o100644), "0644");
        assert_eq!(artifact_path("gen/", "gen/api/openapi.json"), Some("api/openapi.json"));
        assert_eq!(artifact_path(".", "api/openapi.json"), Some("api/openapi.json"));
        assert_eq!(artifact_path("gen", "generated/x.json"), None);
    }

    #[test]
    fn test_diff_add_update_skip_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("api")).unwrap();
        std::fs::write(root.join("api/same.json"), "{}\n").unwrap();
        std::fs::write(root.join("api/changed.json"), "old").unwrap();
        std::fs::write(root.join("api/stale.json"), "gone").unwrap();

        let mut previous = ArtifactSink::new();
        previous.write("api/stale.json", "gone").unwrap();
        previous.write("api/same.json", "{}\n").unwrap();
        write_manifest(root, &ArtifactManifest::from_artifacts("2", "", &previous)).unwrap();

        let mut sink = ArtifactSink::new();
        sink.write("api/same.json", "{}\n").unwrap();
        sink.write("api/changed.json", "new").unwrap();
        sink.write("api/fresh.json", "[]").unwrap();

        let changes = diff_artifacts(root, ".", &sink).unwrap();
        let ops: Vec<(&str, ChangeOp)> = changes.iter().map(|c| (c.path.as_str(), c.op)).collect();
        assert_eq!(
            ops,
            vec![
                ("api/changed.json", ChangeOp::Update),
                ("api/fresh.json", ChangeOp::Add),
                ("api/stale.json", ChangeOp::Delete),
            ]
        );
        assert_eq!(changes[0].before_hash, sha256_hex(b"old"));
        assert_eq!(changes[0].after_hash, sha256_hex(b"new"));
        assert_eq!(STANDARD.decode(&changes[1].content_b64).unwrap(), b"[]");
        assert_eq!(changes[1].after_mode, "0644");
        assert!(changes[2].content_b64.is_empty());
    }

    #[test]
    fn test_plan_for_broken_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cue/api")).unwrap();
        std::fs::write(dir.path().join("cue/api/bad.cue"), "package api\n\nx: {\n").unwrap();
        let plan = build_plan(dir.path(), &PlanOptions::default()).unwrap();
        assert_eq!(plan.status, PlanStatus::Fail);
        let last = plan.diagnostics.last().unwrap();
        assert_eq!(last.code, PIPELINE_ERROR);
        assert!(last.message.starts_with("[CUE:CUE_API_LOAD_ERROR]"));
        assert_eq!(plan.steps[1].status, "skip");
    }
}
