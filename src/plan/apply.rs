use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{info, warn};

use super::build::artifact_path;
use super::hash::{input_hash, sha256_hex, workspace_hash};
use super::{validate_plan, BuildPlan, ChangeOp, FileChange, PlanError};
use crate::config::CompilerConfig;
use crate::generator::artifacts::normalize_artifact_path;
use crate::generator::manifest::ArtifactHashRecord;
use crate::generator::{read_manifest, write_manifest, ArtifactManifest, ArtifactSink};
use crate::lock::ProjectLocks;

/// Apply a plan with the workspace's own configuration
pub fn apply_plan(base: &Path, plan: &BuildPlan) -> Result<usize, PlanError> {
    let config = CompilerConfig::load(base)?;
    apply_plan_with(base, plan, &config)
}

/// Check preconditions, then write the change set atomically: every touched
/// file is backed up under `.ang/backup/<id>/` and restored if any change
/// fails. The artifact manifest is updated to match before the lock is
/// released. Returns the number of applied changes.
pub fn apply_plan_with(base: &Path, plan: &BuildPlan, config: &CompilerConfig) -> Result<usize, PlanError> {
    validate_plan(Some(plan))?;

    let current_input = input_hash(&base.join(&config.cue_root))?;
    if !plan.input_hash.is_empty() && !current_input.is_empty() && plan.input_hash != current_input {
        return Err(PlanError::InputHashMismatch);
    }
    if !plan.preconditions.workspace_hash.is_empty() && base.is_dir() {
        let current = workspace_hash(base)?;
        if !current.is_empty() && current != plan.preconditions.workspace_hash {
            return Err(PlanError::WorkspaceHashMismatch);
        }
    }
    if config.strict_apply {
        return Err(PlanError::ApplyNotImplemented);
    }

    let _guard = ProjectLocks::global().lock(base);
    let staged = stage_changes(&plan.changes)?;
    let hashes: Vec<Option<String>> = staged.iter().map(|c| c.as_deref().map(sha256_hex)).collect();
    let backup = Backup::create(base)?;

    for (idx, (change, content)) in plan.changes.iter().zip(staged).enumerate() {
        if let Err(err) = backup.save(&change.path).and_then(|_| write_change(base, change, content)) {
            warn!(path = %change.path, error = %err, "apply failed, rolling back");
            return Err(roll_back(&backup, &plan.changes[..=idx], err));
        }
    }
    if let Err(err) = record_applied(base, &config.output.dir, plan, &hashes) {
        warn!(error = %err, "manifest update failed, rolling back");
        return Err(roll_back(&backup, &plan.changes, err));
    }
    backup.discard();
    info!(changes = plan.changes.len(), "plan applied");
    Ok(plan.changes.len())
}

fn roll_back(backup: &Backup, touched: &[FileChange], err: PlanError) -> PlanError {
    match backup.restore(touched) {
        Ok(()) => backup.discard(),
        Err(rb) => warn!(error = %rb, backup = %backup.dir.display(), "rollback incomplete, backup kept"),
    }
    err
}

/// Record applied adds and updates in the artifact manifest and drop the
/// deleted paths. Changes outside `out_dir` are not artifacts.
fn record_applied(base: &Path, out_dir: &str, plan: &BuildPlan, hashes: &[Option<String>]) -> Result<(), PlanError> {
    if plan.changes.is_empty() {
        return Ok(());
    }
    let mut manifest =
        read_manifest(base).unwrap_or_else(|_| ArtifactManifest::from_artifacts("", "", &ArtifactSink::new()));
    let mut records: BTreeMap<String, String> = manifest.artifacts.drain(..).map(|r| (r.path, r.hash)).collect();
    for (change, hash) in plan.changes.iter().zip(hashes) {
        let Some(path) = artifact_path(out_dir, &change.path) else {
            continue;
        };
        match hash {
            Some(h) => records.insert(path.to_string(), h.clone()),
            None => records.remove(path),
        };
    }
    manifest.artifacts = records
        .into_iter()
        .map(|(path, hash)| ArtifactHashRecord { path, hash })
        .collect();
    manifest.compiler_version = crate::COMPILER_VERSION.to_string();
    if !plan.input_hash.is_empty() {
        manifest.input_hash = plan.input_hash.clone();
    }
    write_manifest(base, &manifest)?;
    Ok(())
}

/// Decode and verify every add/update before the first write
fn stage_changes(changes: &[FileChange]) -> Result<Vec<Option<Vec<u8>>>, PlanError> {
    changes
        .iter()
        .map(|c| {
            normalize_artifact_path(&c.path).map_err(|e| PlanError::InvalidChange {
                path: c.path.clone(),
                reason: e.to_string(),
            })?;
            match c.op {
                ChangeOp::Delete => Ok(None),
                ChangeOp::Add | ChangeOp::Update => {
                    let content = STANDARD.decode(c.content_b64.trim()).map_err(|e| PlanError::InvalidChange {
                        path: c.path.clone(),
                        reason: format!("contentB64: {e}"),
                    })?;
                    let actual = sha256_hex(&content);
                    if !c.after_hash.is_empty() && actual != c.after_hash {
                        return Err(PlanError::ContentHashMismatch {
                            path: c.path.clone(),
                            expected: c.after_hash.clone(),
                            actual,
                        });
                    }
                    Ok(Some(content))
                }
            }
        })
        .collect()
}

fn write_change(base: &Path, change: &FileChange, content: Option<Vec<u8>>) -> Result<(), PlanError> {
    let target = base.join(&change.path);
    match content {
        None => match std::fs::remove_file(&target) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(PlanError::io("remove", &target, e)),
            _ => Ok(()),
        },
        Some(bytes) => {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PlanError::io("mkdir", parent, e))?;
            }
            std::fs::write(&target, bytes).map_err(|e| PlanError::io("write", &target, e))
        }
    }
}

struct Backup {
    base: PathBuf,
    dir: PathBuf,
}

impl Backup {
    fn create(base: &Path) -> Result<Self, PlanError> {
        let dir = base
            .join(".ang")
            .join("backup")
            .join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir).map_err(|e| PlanError::io("mkdir", &dir, e))?;
        Ok(Self {
            base: base.to_path_buf(),
            dir,
        })
    }

    /// Copy the current file, if any, into the backup tree
    fn save(&self, rel: &str) -> Result<(), PlanError> {
        let src = self.base.join(rel);
        if !src.is_file() {
            return Ok(());
        }
        let dst = self.dir.join(rel);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PlanError::io("mkdir", parent, e))?;
        }
        std::fs::copy(&src, &dst).map_err(|e| PlanError::io("backup", &src, e))?;
        Ok(())
    }

    /// Put every touched path back: saved files are copied back, files that
    /// did not exist before are removed
    fn restore(&self, touched: &[FileChange]) -> Result<(), PlanError> {
        for change in touched.iter().rev() {
            let saved = self.dir.join(&change.path);
            let target = self.base.join(&change.path);
            if saved.is_file() {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| PlanError::io("mkdir", parent, e))?;
                }
                std::fs::copy(&saved, &target).map_err(|e| PlanError::io("restore", &target, e))?;
            } else if target.is_file() {
                std::fs::remove_file(&target).map_err(|e| PlanError::io("remove", &target, e))?;
            }
        }
        Ok(())
    }

    fn discard(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "failed to remove backup");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanStatus, PLAN_SCHEMA_VERSION};
    use pretty_assertions::assert_eq;

    fn plan_for(root: &Path, changes: Vec<FileChange>) -> BuildPlan {
        BuildPlan {
            schema_version: PLAN_SCHEMA_VERSION.into(),
            plan_version: "0.1.0".into(),
            workspace_root: root.display().to_string(),
            status: PlanStatus::Ok,
            changes,
            ..Default::default()
        }
    }

    fn add(path: &str, body: &str) -> FileChange {
        FileChange {
            op: ChangeOp::Add,
            path: path.into(),
            after_hash: sha256_hex(body.as_bytes()),
            after_mode: "0644".into(),
            content_b64: STANDARD.encode(body),
            ..Default::default()
        }
    }

    #[test]
    fn test_input_hash_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("cue")).unwrap();
        std::fs::write(dir.path().join("cue/a.cue"), "package a\n").unwrap();
        let mut plan = plan_for(dir.path(), vec![add("out.txt", "x")]);
        plan.input_hash = "deadbeef".into();
        let err = apply_plan_with(dir.path(), &plan, &CompilerConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "plan precondition failed: input hash mismatch");
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_workspace_hash_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_for(dir.path(), vec![]);
        plan.preconditions.workspace_hash = workspace_hash(dir.path()).unwrap();
        std::fs::write(dir.path().join("drift.txt"), "x").unwrap();
        let err = apply_plan_with(dir.path(), &plan, &CompilerConfig::default()).unwrap_err();
        assert!(matches!(err, PlanError::WorkspaceHashMismatch));
    }

    #[test]
    fn test_strict_mode_refuses_to_write() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_for(dir.path(), vec![add("out.txt", "x")]);
        let cfg = CompilerConfig {
            strict_apply: true,
            ..Default::default()
        };
        let err = apply_plan_with(dir.path(), &plan, &cfg).unwrap_err();
        assert_eq!(err.to_string(), "apply phase is not implemented yet");
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn test_apply_writes_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), "bye").unwrap();
        let delete = FileChange {
            op: ChangeOp::Delete,
            path: "old.txt".into(),
            ..Default::default()
        };
        let plan = plan_for(dir.path(), vec![add("gen/new.txt", "hello"), delete]);
        let n = apply_plan_with(dir.path(), &plan, &CompilerConfig::default()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(std::fs::read_to_string(dir.path().join("gen/new.txt")).unwrap(), "hello");
        assert!(!dir.path().join("old.txt").exists());
        let backups = std::fs::read_dir(dir.path().join(".ang/backup")).unwrap().count();
        assert_eq!(backups, 0);
    }

    #[test]
    fn test_applied_artifacts_become_deletion_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CompilerConfig {
            output: crate::config::OutputConfig {
                dir: "gen".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        std::fs::write(dir.path().join("notes.txt"), "kept out of the manifest").unwrap();
        let notes = FileChange {
            op: ChangeOp::Delete,
            path: "notes.txt".into(),
            ..Default::default()
        };
        let plan = plan_for(dir.path(), vec![add("gen/x.json", "{}"), add("gen/y.json", "[]"), notes]);
        apply_plan_with(dir.path(), &plan, &cfg).unwrap();

        let manifest = read_manifest(dir.path()).unwrap();
        let paths: Vec<&str> = manifest.artifacts.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["x.json", "y.json"]);
        assert_eq!(manifest.artifacts[0].hash, sha256_hex(b"{}"));

        let mut still_produced = ArtifactSink::new();
        still_produced.write("y.json", "[]").unwrap();
        let changes = super::super::build::diff_artifacts(dir.path(), "gen", &still_produced).unwrap();
        let ops: Vec<(&str, ChangeOp)> = changes.iter().map(|c| (c.path.as_str(), c.op)).collect();
        assert_eq!(ops, vec![("gen/x.json", ChangeOp::Delete)]);

        let delete = changes.into_iter().next().unwrap();
        apply_plan_with(dir.path(), &plan_for(dir.path(), vec![delete]), &cfg).unwrap();
        let paths: Vec<String> = read_manifest(dir.path()).unwrap().artifacts.into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["y.json"]);
    }

    #[test]
    fn test_corrupt_content_leaves_workspace_untouched() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "original").unwrap();
        let mut bad = add("keep.txt", "replacement");
        bad.after_hash = sha256_hex(b"something else");
        let plan = plan_for(dir.path(), vec![add("a.txt", "a"), bad]);
        let err = apply_plan_with(dir.path(), &plan, &CompilerConfig::default()).unwrap_err();
        assert!(matches!(err, PlanError::ContentHashMismatch { .. }));
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("keep.txt")).unwrap(), "original");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_failure_rolls_back_earlier_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "before").unwrap();
        // a regular file where a directory is needed makes the second write fail
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let mut update = add("a.txt", "after");
        update.op = ChangeOp::Update;
        let plan = plan_for(dir.path(), vec![update, add("blocker/b.txt", "b")]);
        assert!(apply_plan_with(dir.path(), &plan, &CompilerConfig::default()).is_err());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "before");
        assert!(dir.path().join("blocker").is_file());
    }
}
