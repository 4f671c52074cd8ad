//! Artifact hash manifest at `.ang/cache/manifest.json`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::artifacts::ArtifactSink;
use crate::plan::hash::sha256_hex;

pub const ARTIFACT_MANIFEST_SCHEMA_VERSION: &str = "artifact-manifest/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHashRecord {
    pub path: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    pub schema_version: String,
    pub compiler_version: String,
    pub ir_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub input_hash: String,
    pub artifacts: Vec<ArtifactHashRecord>,
}

impl ArtifactManifest {
    /// Records sorted by path; the sink already iterates in path order
    pub fn from_artifacts(ir_version: &str, input_hash: &str, sink: &ArtifactSink) -> Self {
        Self {
            schema_version: ARTIFACT_MANIFEST_SCHEMA_VERSION.to_string(),
            compiler_version: crate::COMPILER_VERSION.to_string(),
            ir_version: ir_version.trim().to_string(),
            input_hash: input_hash.trim().to_string(),
            artifacts: sink
                .iter()
                .map(|a| ArtifactHashRecord {
                    path: a.path.clone(),
                    hash: sha256_hex(&a.content),
                })
                .collect(),
        }
    }
}

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(".ang").join("cache").join("manifest.json")
}

pub fn write_manifest(root: &Path, manifest: &ArtifactManifest) -> Result<()> {
    let path = manifest_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("mkdir artifact manifest dir {}", parent.display()))?;
    }
    let mut data = serde_json::to_vec_pretty(manifest).context("marshal artifact manifest")?;
    data.push(b'\n');
    std::fs::write(&path, data).context("write artifact manifest")
}

pub fn read_manifest(root: &Path) -> Result<ArtifactManifest> {
    let path = manifest_path(root);
    let data = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_manifest_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ArtifactSink::new();
        sink.write("z.sql", "create table x();").unwrap();
        sink.write("a.json", "{}").unwrap();
        let m = ArtifactManifest::from_artifacts("2", "abc", &sink);
        assert_eq!(m.artifacts[0].path, "a.json");
        assert_eq!(m.artifacts[0].hash, sha256_hex(b"{}"));

        write_manifest(dir.path(), &m).unwrap();
        let raw = std::fs::read_to_string(manifest_path(dir.path())).unwrap();
        assert!(raw.contains("\"schemaVersion\": \"artifact-manifest/v1\""));
        assert_eq!(read_manifest(dir.path()).unwrap(), m);
    }
}
