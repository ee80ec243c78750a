//! Deterministic content hash over the agents directory.
//!
//! All markdown files are enumerated recursively, sorted by relative
//! path, and `<relative_path>\n<contents>` is fed per file into one
//! SHA-256. No timestamps, mtimes, or absolute paths participate, so
//! the digest is stable across hosts and runs.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Compute the content hash of every `.md` file under `dir`.
///
/// An empty or missing directory hashes to the digest of zero bytes.
pub fn compute_content_hash(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_markdown(dir, dir, &mut files)?;
    }
    files.sort();

    let mut hasher = Sha256::new();
    for relative in &files {
        let contents = std::fs::read(dir.join(relative))?;
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update(b"\n");
        hasher.update(&contents);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_markdown(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_markdown(root, &path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "md") {
            if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

/// List the relative paths that participate in the hash, sorted.
pub fn hashed_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if dir.is_dir() {
        collect_markdown(dir, dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}
