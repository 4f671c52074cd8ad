//! Source loader
//!
//! Each directory under `cue/` is one package. A directory that does not
//! exist is simply absent; a directory that fails to parse or unify is an
//! error carrying the engine's file/line position.

use std::path::{Path, PathBuf};

use ang_cue::{CueError, Value};
use tracing::debug;

use crate::diagnostics::{Diagnostics, Warning, SEVERITY_WARN};

/// Directories the pipeline knows about, in load order
pub const SOURCE_DIRS: &[&str] = &[
    "domain",
    "architecture",
    "api",
    "repo",
    "events",
    "errors",
    "policies",
    "rbac",
    "views",
    "project",
    "infra",
];

pub const LARGE_SOURCE_FILE: &str = "LARGE_SOURCE_FILE";

pub struct SourceLoader {
    root: PathBuf,
    cue_root: String,
    large_file_lines: usize,
}

impl SourceLoader {
    pub fn new(root: impl Into<PathBuf>, cue_root: impl Into<String>, large_file_lines: usize) -> Self {
        Self {
            root: root.into(),
            cue_root: cue_root.into(),
            large_file_lines,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load `cue/<subpath>` as one unified package.
    ///
    /// Returns `Ok(None)` when the directory is missing or holds no `.cue`
    /// files.
    pub fn load_optional(&self, subpath: &str, diags: &Diagnostics) -> Result<Option<Value>, CueError> {
        let rel_dir = format!("{}/{}", self.cue_root, subpath);
        let dir = self.root.join(&rel_dir);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut names = std::fs::read_dir(&dir)
            .map_err(|source| CueError::Io {
                path: rel_dir.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "cue"))
            .collect::<Vec<_>>();
        names.sort();
        if names.is_empty() {
            return Ok(None);
        }

        let mut sources = Vec::with_capacity(names.len());
        for path in names {
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let rel = format!("{rel_dir}/{file_name}");
            let content = std::fs::read_to_string(&path).map_err(|source| CueError::Io {
                path: rel.clone(),
                source,
            })?;
            let lines = content.lines().count();
            if self.large_file_lines > 0 && lines > self.large_file_lines {
                diags.report(
                    Warning::new(
                        "loader",
                        LARGE_SOURCE_FILE,
                        SEVERITY_WARN,
                        format!(
                            "{rel} has {lines} lines (threshold {}); consider splitting it",
                            self.large_file_lines
                        ),
                    )
                    .at(&ang_cue::Pos {
                        file: rel.clone(),
                        line: 1,
                        column: 1,
                    })
                    .with_hint("split the package into smaller files by aggregate"),
                );
            }
            sources.push((rel, content));
        }

        debug!(dir = %rel_dir, files = sources.len(), "loading package");
        ang_cue::load_package(&sources).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use std::sync::Arc;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_dir_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SourceLoader::new(dir.path(), "cue", 600);
        let diags = Diagnostics::new(None);
        assert!(loader.load_optional("domain", &diags).unwrap().is_none());
    }

    #[test]
    fn test_loads_package_with_relative_positions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue/domain/user.cue", "package domain\n\n#User: {\n\tid: string\n}\n");
        let loader = SourceLoader::new(dir.path(), "cue", 600);
        let diags = Diagnostics::new(None);
        let value = loader.load_optional("domain", &diags).unwrap().unwrap();
        let id = value.lookup("#User.id").unwrap();
        assert_eq!(id.pos().file, "cue/domain/user.cue");
        assert_eq!(id.pos().line, 4);
    }

    #[test]
    fn test_syntax_error_carries_location() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "cue/api/bad.cue", "package api\n\nx: {\n");
        let loader = SourceLoader::new(dir.path(), "cue", 600);
        let diags = Diagnostics::new(None);
        let err = loader.load_optional("api", &diags).unwrap_err();
        let (file, _, _) = err.location().unwrap();
        assert_eq!(file, "cue/api/bad.cue");
    }

    #[test]
    fn test_large_file_warning() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = String::from("package domain\n\n#Big: {\n");
        for i in 0..12 {
            src.push_str(&format!("\tf{i}: string\n"));
        }
        src.push_str("}\n");
        write(dir.path(), "cue/domain/big.cue", &src);
        let sink = CollectingSink::new();
        let diags = Diagnostics::new(Some(Arc::new(sink.clone())));
        SourceLoader::new(dir.path(), "cue", 10)
            .load_optional("domain", &diags)
            .unwrap();
        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, LARGE_SOURCE_FILE);
        assert_eq!(warnings[0].severity, "warn");
    }
}
