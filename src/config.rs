//! Compiler configuration
//!
//! Loaded from an optional `ang.yaml` at the workspace root, then overridden by
//! environment variables (`ANG_PLAN_APPLY_STRICT`, `ANG_LARGE_FILE_LINES`).

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const CONFIG_FILE: &str = "ang.yaml";
pub const DEFAULT_LARGE_FILE_LINES: usize = 600;
pub const ENV_STRICT_APPLY: &str = "ANG_PLAN_APPLY_STRICT";
pub const ENV_LARGE_FILE_LINES: &str = "ANG_LARGE_FILE_LINES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root for generated artifacts, relative to the workspace
    pub dir: String,
    /// Backend subdirectory for language sources
    pub backend_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: ".".to_string(),
            backend_dir: "internal".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub large_file_lines: usize,
    pub cue_root: String,
    pub output: OutputConfig,
    pub strict_apply: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            large_file_lines: DEFAULT_LARGE_FILE_LINES,
            cue_root: "cue".to_string(),
            output: OutputConfig::default(),
            strict_apply: false,
        }
    }
}

impl CompilerConfig {
    /// Read `ang.yaml` (when present) and apply environment overrides
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            info!("Loading compiler configuration from {}", path.display());
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_yaml::from_str::<CompilerConfig>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            debug!("No {} in {}, using defaults", CONFIG_FILE, root.display());
            CompilerConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Environment lookups are injected so tests do not touch the process env
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var(ENV_STRICT_APPLY) {
            self.strict_apply = v.trim() == "1";
        }
        if let Some(n) = var(ENV_LARGE_FILE_LINES).and_then(|v| v.trim().parse::<usize>().ok()) {
            if n > 0 {
                self.large_file_lines = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CompilerConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.cue_root, "cue");
        assert_eq!(cfg.output, OutputConfig::default());
        assert_eq!(CompilerConfig::default().large_file_lines, 600);
    }

    #[test]
    fn test_invalid_yaml_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "large_file_lines: [").unwrap();
        let err = CompilerConfig::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_yaml_file_with_partial_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "large_file_lines: 50\noutput:\n  backend_dir: app\n").unwrap();
        let content = std::fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap();
        let cfg: CompilerConfig = serde_yaml::from_str(&content).unwrap();
        assert_eq!(cfg.large_file_lines, 50);
        assert_eq!(cfg.output.backend_dir, "app");
        assert_eq!(cfg.output.dir, ".");
        assert_eq!(cfg.cue_root, "cue");
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = CompilerConfig::default();
        cfg.apply_env_overrides(|k| match k {
            ENV_STRICT_APPLY => Some("1".into()),
            ENV_LARGE_FILE_LINES => Some("120".into()),
            _ => None,
        });
        assert!(cfg.strict_apply);
        assert_eq!(cfg.large_file_lines, 120);

        cfg.apply_env_overrides(|k| (k == ENV_LARGE_FILE_LINES).then(|| "nope".to_string()));
        assert_eq!(cfg.large_file_lines, 120);
    }
}
