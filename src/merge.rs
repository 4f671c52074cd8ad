//! Structural merge of CUE source files
//!
//! Patches are applied to the syntax tree, never to text: the target and the
//! patch are both parsed with comments kept, the patch declarations are merged
//! at a dotted selector, and the result is written back in canonical form.

use std::path::{Path, PathBuf};

use ang_cue::{format_file, parse_file, CueError, Decl, DeclKind, Expr, ExprKind, Field, File, Label, Optionality, StructLit};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::generator::artifacts::normalize_artifact_path;
use crate::lock::ProjectLocks;

/// Results shorter than this share of the original are rejected
pub const REDUCTION_THRESHOLD: f64 = 0.7;
/// Files with at most this many lines are exempt from the reduction guard
pub const REDUCTION_MIN_LINES: usize = 20;

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_#$][A-Za-z0-9_#$]*$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("read original: {0}")]
    Read(#[source] std::io::Error),

    #[error("parse original: {0}")]
    ParseOriginal(#[source] CueError),

    #[error("parse patch: {0}")]
    ParsePatch(#[source] CueError),

    #[error("selector path {0} is not a struct")]
    NotAStruct(String),

    #[error("CRITICAL_REDUCTION_DETECTED: file reduced from {from} to {to} lines")]
    CriticalReduction { from: usize, to: usize },

    #[error("invalid merge target {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("verification failed, {path} reverted: {source}")]
    Verify {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Merged content for `path` without writing it
pub fn get_merged_content(path: &Path, selector: &str, patch: &str, forced: bool) -> Result<Vec<u8>, MergeError> {
    let filename = path.display().to_string();
    let (mut target, original_lines) = match std::fs::read_to_string(path) {
        Ok(src) => (
            parse_file(&filename, &src).map_err(MergeError::ParseOriginal)?,
            count_lines(&src),
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (File::default(), 0),
        Err(e) => return Err(MergeError::Read(e)),
    };
    let patch_file = parse_file("patch.cue", patch).map_err(MergeError::ParsePatch)?;

    if target.package.is_none() {
        target.package = patch_file.package.clone();
    }
    for import in &patch_file.imports {
        if !target.imports.iter().any(|i| i.path == import.path) {
            target.imports.push(import.clone());
        }
    }

    let selector = selector.trim();
    if selector.is_empty() {
        merge_decls(&mut target.decls, patch_file.decls, forced);
    } else {
        merge_at_selector(&mut target.decls, selector, patch_file.decls, forced)?;
    }

    let result = format_file(&target);
    let result_lines = count_lines(&result);
    if original_lines > REDUCTION_MIN_LINES && (result_lines as f64) < original_lines as f64 * REDUCTION_THRESHOLD {
        warn!(file = %filename, from = original_lines, to = result_lines, "merge would shrink file, refusing");
        return Err(MergeError::CriticalReduction {
            from: original_lines,
            to: result_lines,
        });
    }
    debug!(file = %filename, selector, forced, lines = result_lines, "merged");
    Ok(result.into_bytes())
}

/// Merge into `root/rel` and write the result while holding the project lock
pub fn merge_file(root: &Path, rel: &str, selector: &str, patch: &str, forced: bool) -> Result<Vec<u8>, MergeError> {
    let path = resolve(root, rel)?;
    let _guard = ProjectLocks::global().lock(root);
    let content = get_merged_content(&path, selector, patch, forced)?;
    write(&path, &content)?;
    info!(path = %rel, selector, "merge written");
    Ok(content)
}

/// Like [`merge_file`], then run `verify` against the workspace. Any failure
/// puts the file back the way it was, including removing a file the merge
/// created.
pub fn merge_and_verify<F>(
    root: &Path,
    rel: &str,
    selector: &str,
    patch: &str,
    forced: bool,
    verify: F,
) -> Result<Vec<u8>, MergeError>
where
    F: FnOnce(&Path) -> anyhow::Result<()>,
{
    let path = resolve(root, rel)?;
    let _guard = ProjectLocks::global().lock(root);
    let previous = match std::fs::read(&path) {
        Ok(data) => Some(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(MergeError::Read(e)),
    };
    let content = get_merged_content(&path, selector, patch, forced)?;
    write(&path, &content)?;

    if let Err(source) = verify(root) {
        warn!(path = %rel, error = %source, "verification failed, reverting merge");
        let restored = match &previous {
            Some(data) => write(&path, data),
            None => std::fs::remove_file(&path).map_err(|e| MergeError::Write {
                path: path.display().to_string(),
                source: e,
            }),
        };
        restored?;
        return Err(MergeError::Verify {
            path: rel.to_string(),
            source,
        });
    }
    Ok(content)
}

fn resolve(root: &Path, rel: &str) -> Result<PathBuf, MergeError> {
    let clean = normalize_artifact_path(rel).map_err(|e| MergeError::InvalidPath {
        path: rel.to_string(),
        reason: e.to_string(),
    })?;
    Ok(root.join(clean))
}

fn write(path: &Path, content: &[u8]) -> Result<(), MergeError> {
    let err = |source| MergeError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(err)?;
    }
    std::fs::write(path, content).map_err(err)
}

fn count_lines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

fn field_index(decls: &[Decl], label: &Label) -> Option<usize> {
    decls
        .iter()
        .position(|d| d.as_field().is_some_and(|f| same_label(&f.label, label)))
}

fn same_label(a: &Label, b: &Label) -> bool {
    match (a.name(), b.name()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn label_for(segment: &str) -> Label {
    if IDENT_RE.is_match(segment) {
        Label::Ident(segment.to_string())
    } else {
        Label::Quoted(segment.to_string())
    }
}

fn struct_of(decls: Vec<Decl>) -> Expr {
    Expr::synthetic(ExprKind::Struct(StructLit {
        decls,
        ..Default::default()
    }))
}

/// Walk `a.b.c`, creating missing segments as empty structs, and merge the
/// patch into the terminal field
fn merge_at_selector(decls: &mut Vec<Decl>, selector: &str, patch: Vec<Decl>, forced: bool) -> Result<(), MergeError> {
    let parts: Vec<&str> = selector.split('.').collect();
    let mut current = decls;
    for (i, part) in parts.iter().enumerate() {
        let label = label_for(part);
        let idx = match field_index(current, &label) {
            Some(idx) => idx,
            None => {
                current.push(Decl::new(DeclKind::Field(Field {
                    label,
                    optional: Optionality::Regular,
                    value: struct_of(Vec::new()),
                    attrs: Vec::new(),
                })));
                current.len() - 1
            }
        };
        let Some(field) = current[idx].as_field_mut() else {
            return Err(MergeError::NotAStruct(parts[..=i].join(".")));
        };

        if i == parts.len() - 1 {
            match &mut field.value.kind {
                ExprKind::Struct(lit) if !forced => merge_decls(&mut lit.decls, patch, false),
                _ => field.value = struct_of(patch),
            }
            return Ok(());
        }
        match &mut field.value.kind {
            ExprKind::Struct(lit) => current = &mut lit.decls,
            _ => return Err(MergeError::NotAStruct(parts[..=i].join("."))),
        }
    }
    Ok(())
}

/// Patch fields with a matching label merge into the existing field; all
/// other patch declarations are appended in order
fn merge_decls(target: &mut Vec<Decl>, patch: Vec<Decl>, forced: bool) {
    for decl in patch {
        let Some(idx) = decl.as_field().and_then(|f| field_index(target, &f.label)) else {
            target.push(decl);
            continue;
        };
        if let (DeclKind::Field(incoming), Some(field)) = (decl.kind, target[idx].as_field_mut()) {
            merge_field(field, incoming, forced);
        }
    }
}

fn merge_field(target: &mut Field, incoming: Field, forced: bool) {
    let both_structs =
        matches!(target.value.kind, ExprKind::Struct(_)) && matches!(incoming.value.kind, ExprKind::Struct(_));
    if !forced && both_structs {
        if let (ExprKind::Struct(lit), ExprKind::Struct(patch)) = (&mut target.value.kind, incoming.value.kind) {
            merge_decls(&mut lit.decls, patch.decls, false);
            if lit.decls.len() > 1 {
                lit.shorthand = false;
            }
        }
        return;
    }
    target.value = incoming.value;
    if !incoming.attrs.is_empty() {
        target.attrs = incoming.attrs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_src(dir: &Path, rel: &str, src: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, src).unwrap();
        path
    }

    fn merged(path: &Path, selector: &str, patch: &str, forced: bool) -> String {
        String::from_utf8(get_merged_content(path, selector, patch, forced).unwrap()).unwrap()
    }

    #[test]
    fn test_deep_merge_keeps_comments_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_src(
            dir.path(),
            "cue/domain/user.cue",
            "package domain\n\n// user entity\n#User: {\n\tid: string\n\tname: string // display\n}\n",
        );
        let out = merged(&path, "", "#User: {\n\tname: string | *\"anon\"\n\temail: string\n}\n", false);
        assert_eq!(
            out,
            "package domain\n\n// user entity\n#User: {\n\tid: string\n\tname: string | *\"anon\" // display\n\temail: string\n}\n"
        );
    }

    #[test]
    fn test_selector_auto_creates_missing_structs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cue/api/new.cue");
        let out = merged(&path, "api.orders", "limit: 10\n", false);
        assert_eq!(out, "api: {\n\torders: {\n\t\tlimit: 10\n\t}\n}\n");
    }

    #[test]
    fn test_selector_through_scalar_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_src(dir.path(), "a.cue", "a: {\n\tb: 1\n}\n");
        let err = get_merged_content(&path, "a.b.c", "x: 1\n", false).unwrap_err();
        assert_eq!(err.to_string(), "selector path a.b is not a struct");
    }

    #[test]
    fn test_forced_merge_replaces_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_src(dir.path(), "a.cue", "cfg: {\n\told: 1\n\tkeep: 2\n}\n");
        assert_eq!(merged(&path, "cfg", "fresh: 3\n", true), "cfg: {\n\tfresh: 3\n}\n");
        assert_eq!(
            merged(&path, "cfg", "fresh: 3\n", false),
            "cfg: {\n\told: 1\n\tkeep: 2\n\tfresh: 3\n}\n"
        );
    }

    #[test]
    fn test_reduction_guard_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = String::from("cfg: {\n");
        for i in 0..38 {
            src.push_str(&format!("\tk{i}: {i}\n"));
        }
        src.push_str("}\n");
        assert_eq!(count_lines(&src), 40);
        let path = write_src(dir.path(), "cue/big.cue", &src);

        let mut patch = String::from("cfg: {\n");
        for i in 0..10 {
            patch.push_str(&format!("\tn{i}: {i}\n"));
        }
        patch.push_str("}\n");

        let err = merge_file(dir.path(), "cue/big.cue", "", &patch, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "CRITICAL_REDUCTION_DETECTED: file reduced from 40 to 12 lines"
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), src);
    }

    #[test]
    fn test_merge_and_verify_reverts_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_src(dir.path(), "cue/a.cue", "a: 1\n");
        let err = merge_and_verify(dir.path(), "cue/a.cue", "", "a: 2\n", false, |_| {
            anyhow::bail!("pipeline broke")
        })
        .unwrap_err();
        assert!(matches!(err, MergeError::Verify { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a: 1\n");

        let err = merge_and_verify(dir.path(), "cue/b.cue", "", "b: 2\n", false, |_| anyhow::bail!("no")).unwrap_err();
        assert!(matches!(err, MergeError::Verify { .. }));
        assert!(!dir.path().join("cue/b.cue").exists());

        merge_and_verify(dir.path(), "cue/a.cue", "", "a: 3\n", false, |_| Ok(())).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a: 3\n");
    }

    #[test]
    fn test_escaping_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = merge_file(dir.path(), "../outside.cue", "", "a: 1\n", false).unwrap_err();
        assert!(matches!(err, MergeError::InvalidPath { .. }));
    }
}
