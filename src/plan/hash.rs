//! Content hashes for plans and manifests

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Files under `dir` in walk order: entries sorted by name, directories
/// entered where they sort. `skip` prunes directories by relative path.
fn walk_files(dir: &Path, rel: &str, skip: &dyn Fn(&str) -> bool, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("read dir {}", dir.display()))?
        .collect::<Result<_, _>>()
        .with_context(|| format!("read dir {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let child_rel = if rel.is_empty() { name } else { format!("{rel}/{name}") };
        let path = entry.path();
        if path.is_dir() {
            if skip(&child_rel) {
                continue;
            }
            walk_files(&path, &child_rel, skip, out)?;
        } else {
            out.push((child_rel, path));
        }
    }
    Ok(())
}

/// sha256 over the bytes of every file under `cue_dir`, in walk order. A
/// missing directory hashes as zero bytes.
pub fn input_hash(cue_dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    if cue_dir.is_dir() {
        let mut files = Vec::new();
        walk_files(cue_dir, "", &|_| false, &mut files)?;
        for (_, path) in files {
            let data = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            hasher.update(&data);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// sha256 over `rel/path\n` followed by the file bytes, for every file under
/// `root` except `.git`, sorted by relative path
pub fn workspace_hash(root: &Path) -> Result<String> {
    let mut files = Vec::new();
    walk_files(root, "", &|rel| rel == ".git", &mut files)?;
    files.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Sha256::new();
    for (rel, path) in files {
        hasher.update(rel.as_bytes());
        hasher.update(b"\n");
        let data = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
        hasher.update(&data);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Identity of the generator itself: compiler version and IR version
pub fn compiler_hash() -> String {
    sha256_hex(format!("ang {}\nir {}\n", crate::COMPILER_VERSION, crate::ir::IR_VERSION_CURRENT).as_bytes())
}
