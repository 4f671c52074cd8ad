//! In-memory artifact staging
//!
//! Steps never touch the filesystem. They write into an [`ArtifactSink`],
//! which a build flushes to disk and a plan diffs against the workspace.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use anyhow::{bail, Context, Result};
use serde::Serialize;

pub const DEFAULT_FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Workspace-relative path with `/` separators
    pub path: String,
    pub content: Vec<u8>,
    pub mode: u32,
}

/// Artifacts keyed by path; writing the same path twice replaces it
#[derive(Debug, Clone, Default)]
pub struct ArtifactSink {
    artifacts: BTreeMap<String, Artifact>,
}

/// Reject absolute paths and parent traversal so artifacts stay inside the
/// workspace
pub fn normalize_artifact_path(path: &str) -> Result<String> {
    let p = Path::new(path.trim());
    let mut parts = Vec::new();
    for c in p.components() {
        match c {
            Component::Normal(s) => parts.push(s.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => bail!("artifact path {path:?} escapes the workspace"),
        }
    }
    if parts.is_empty() {
        bail!("artifact path is empty");
    }
    Ok(parts.join("/"))
}

impl ArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, path: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        let path = normalize_artifact_path(path)?;
        self.artifacts.insert(
            path.clone(),
            Artifact {
                path,
                content: content.into(),
                mode: DEFAULT_FILE_MODE,
            },
        );
        Ok(())
    }

    /// Pretty JSON with a trailing newline
    pub fn write_json<T: Serialize>(&mut self, path: &str, value: &T) -> Result<()> {
        let mut out = serde_json::to_vec_pretty(value).with_context(|| format!("serialize {path}"))?;
        out.push(b'\n');
        self.write(path, out)
    }

    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.get(path)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Artifacts in path order
    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn paths(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }

    pub fn extend(&mut self, other: ArtifactSink) {
        self.artifacts.extend(other.artifacts);
    }

    /// Write every artifact under `root`, creating parent directories
    pub fn flush_to(&self, root: &Path) -> Result<usize> {
        for a in self.artifacts.values() {
            let target = root.join(&a.path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&target, &a.content).with_context(|| format!("Failed to write {}", target.display()))?;
        }
        Ok(self.artifacts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_paths_are_normalized_and_sorted() {
        let mut sink = ArtifactSink::new();
        sink.write("./b/z.txt", "z").unwrap();
        sink.write("a.txt", "a").unwrap();
        assert_eq!(sink.paths(), vec!["a.txt", "b/z.txt"]);
    }

    #[test]
    fn test_escaping_paths_are_rejected() {
        let mut sink = ArtifactSink::new();
        assert!(sink.write("../etc/passwd", "x").is_err());
        assert!(sink.write("/abs", "x").is_err());
        assert!(sink.write("  ", "x").is_err());
    }

    #[test]
    fn test_flush_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ArtifactSink::new();
        sink.write_json("api/openapi.json", &serde_json::json!({"openapi": "3.0.3"})).unwrap();
        assert_eq!(sink.flush_to(dir.path()).unwrap(), 1);
        let written = std::fs::read_to_string(dir.path().join("api/openapi.json")).unwrap();
        assert!(written.ends_with("}\n"));
    }
}
