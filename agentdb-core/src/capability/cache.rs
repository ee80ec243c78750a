//! On-disk capability cache with sentinel-last atomic persistence.
//!
//! Three files live under the cache directory: `embeddings.json`,
//! `metadata.json`, and `hash.txt`. The hash sentinel is renamed into
//! place last, so its presence is the sole proof of a complete cache.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::entry::CapabilityEntry;
use super::hash::compute_content_hash;
use crate::error::{CacheMissReason, Error, Result};

/// Supported cache format version.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Entries sampled for dimension validation on load.
const VALIDATION_SAMPLE: usize = 5;

const EMBEDDINGS_FILE: &str = "embeddings.json";
const METADATA_FILE: &str = "metadata.json";
const HASH_FILE: &str = "hash.txt";

/// `embeddings.json` layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingsFile {
    pub version: String,
    pub generated_at: i64,
    pub embedding_dimension: usize,
    pub agent_count: usize,
    pub entries: HashMap<String, CapabilityEntry>,
}

/// `metadata.json` layout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFile {
    pub version: String,
    pub cache_format_version: u32,
    pub created_at: i64,
    pub last_validated_at: i64,
    pub content_hash: String,
    pub agent_count: usize,
    pub embedding_dimension: usize,
    pub embedding_provider: String,
    pub agents_path: String,
    pub build_duration_ms: u64,
    #[serde(default)]
    pub file_hashes: HashMap<String, String>,
}

/// Atomic reader/writer for the capability cache directory.
pub struct CapabilityCache {
    cache_dir: PathBuf,
}

impl CapabilityCache {
    #[must_use]
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Remove orphaned temp files from an interrupted save.
    pub fn sweep_orphans(&self) -> Result<()> {
        if !self.cache_dir.is_dir() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                debug!(path = %path.display(), "removing orphaned cache temp file");
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    /// Validate and load the cache against the current agents directory.
    ///
    /// Every rejection carries a typed [`CacheMissReason`]; callers treat
    /// any error as "rebuild".
    pub fn load(
        &self,
        agents_dir: &Path,
        expected_dimension: usize,
    ) -> Result<HashMap<String, CapabilityEntry>> {
        let hash_path = self.cache_dir.join(HASH_FILE);
        if !hash_path.is_file() {
            return Err(Error::CacheInvalid(CacheMissReason::MissingSentinel));
        }
        let stored_hash = std::fs::read_to_string(&hash_path)?;
        let current_hash = compute_content_hash(agents_dir)?;
        if stored_hash.trim() != current_hash {
            return Err(Error::CacheInvalid(CacheMissReason::HashMismatch));
        }

        let metadata: MetadataFile = read_json(&self.cache_dir.join(METADATA_FILE))?;
        if metadata.cache_format_version != CACHE_FORMAT_VERSION {
            return Err(Error::CacheInvalid(CacheMissReason::FormatVersion(
                metadata.cache_format_version,
            )));
        }

        let embeddings: EmbeddingsFile = read_json(&self.cache_dir.join(EMBEDDINGS_FILE))?;
        if embeddings.embedding_dimension != expected_dimension {
            return Err(Error::CacheInvalid(CacheMissReason::DimensionMismatch {
                expected: expected_dimension,
                actual: embeddings.embedding_dimension,
            }));
        }
        for entry in embeddings.entries.values().take(VALIDATION_SAMPLE) {
            if entry.embedding.len() != expected_dimension {
                return Err(Error::CacheInvalid(CacheMissReason::DimensionMismatch {
                    expected: expected_dimension,
                    actual: entry.embedding.len(),
                }));
            }
        }
        if embeddings.agent_count != embeddings.entries.len() {
            return Err(Error::CacheInvalid(CacheMissReason::CountMismatch {
                declared: embeddings.agent_count,
                actual: embeddings.entries.len(),
            }));
        }

        debug!(
            agents = embeddings.entries.len(),
            "capability cache validated"
        );
        Ok(embeddings.entries)
    }

    /// Persist the cache atomically: unique temp files, renamed in order
    /// embeddings, metadata, hash. Temp files are cleaned up on failure.
    pub fn save(
        &self,
        entries: &HashMap<String, CapabilityEntry>,
        dimension: usize,
        content_hash: &str,
        agents_dir: &Path,
        provider: &str,
        build_duration_ms: u64,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let now = Utc::now().timestamp_millis();

        let embeddings = EmbeddingsFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: now,
            embedding_dimension: dimension,
            agent_count: entries.len(),
            entries: entries.clone(),
        };
        let metadata = MetadataFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache_format_version: CACHE_FORMAT_VERSION,
            created_at: now,
            last_validated_at: now,
            content_hash: content_hash.to_string(),
            agent_count: entries.len(),
            embedding_dimension: dimension,
            embedding_provider: provider.to_string(),
            agents_path: agents_dir.to_string_lossy().into_owned(),
            build_duration_ms,
            file_hashes: HashMap::new(),
        };

        let staged = [
            (EMBEDDINGS_FILE, serde_json::to_vec_pretty(&embeddings)?),
            (METADATA_FILE, serde_json::to_vec_pretty(&metadata)?),
            (HASH_FILE, content_hash.as_bytes().to_vec()),
        ];

        let mut temp_paths = Vec::with_capacity(staged.len());
        let result = (|| -> Result<()> {
            for (name, bytes) in &staged {
                let temp = self
                    .cache_dir
                    .join(format!("{name}.{}.tmp", Uuid::new_v4()));
                std::fs::write(&temp, bytes)?;
                temp_paths.push((temp, self.cache_dir.join(name)));
            }
            // Sentinel-last: hash.txt is the final rename.
            for (temp, target) in &temp_paths {
                std::fs::rename(temp, target)?;
            }
            Ok(())
        })();

        if result.is_err() {
            for (temp, _) in &temp_paths {
                let _ = std::fs::remove_file(temp);
            }
            warn!("capability cache save failed, temp files removed");
        }
        result
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_| Error::CacheInvalid(CacheMissReason::Corrupt(path_name(path))))?;
    serde_json::from_str(&contents)
        .map_err(|_| Error::CacheInvalid(CacheMissReason::Corrupt(path_name(path))))
}

fn path_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::entry::Domain;
    use tempfile::TempDir;

    fn entry(key: &str, dim: usize) -> CapabilityEntry {
        CapabilityEntry {
            agent_key: key.to_string(),
            name: key.to_string(),
            description: format!("{key} description"),
            domains: vec![Domain::General],
            keywords: vec!["kw".into()],
            embedding: vec![1.0 / (dim as f32).sqrt(); dim],
            success_rate: 0.5,
            task_count: 4,
            indexed_at: Utc::now(),
        }
    }

    fn setup(dim: usize, agents: usize) -> (TempDir, TempDir, HashMap<String, CapabilityEntry>) {
        let cache_dir = TempDir::new().unwrap();
        let agents_dir = TempDir::new().unwrap();
        let mut entries = HashMap::new();
        for i in 0..agents {
            let key = format!("agent{i}");
            std::fs::write(
                agents_dir.path().join(format!("{key}.md")),
                format!("# {key}\nDoes things"),
            )
            .unwrap();
            entries.insert(key.clone(), entry(&key, dim));
        }
        (cache_dir, agents_dir, entries)
    }

    #[test]
    fn save_load_round_trip() {
        let (cache_dir, agents_dir, entries) = setup(8, 10);
        let cache = CapabilityCache::new(cache_dir.path().to_path_buf());
        let hash = compute_content_hash(agents_dir.path()).unwrap();
        cache
            .save(&entries, 8, &hash, agents_dir.path(), "mock", 12)
            .unwrap();

        let loaded = cache.load(agents_dir.path(), 8).unwrap();
        assert_eq!(loaded.len(), 10);
        for (key, original) in &entries {
            let restored = &loaded[key];
            assert_eq!(restored.embedding, original.embedding);
            assert_eq!(restored.name, original.name);
        }
    }

    #[test]
    fn missing_sentinel_is_a_cache_miss() {
        let (cache_dir, agents_dir, _) = setup(8, 1);
        let cache = CapabilityCache::new(cache_dir.path().to_path_buf());
        let err = cache.load(agents_dir.path(), 8).unwrap_err();
        assert!(matches!(
            err,
            Error::CacheInvalid(CacheMissReason::MissingSentinel)
        ));
    }

    #[test]
    fn changed_agents_dir_is_a_hash_mismatch() {
        let (cache_dir, agents_dir, entries) = setup(8, 2);
        let cache = CapabilityCache::new(cache_dir.path().to_path_buf());
        let hash = compute_content_hash(agents_dir.path()).unwrap();
        cache
            .save(&entries, 8, &hash, agents_dir.path(), "mock", 1)
            .unwrap();

        std::fs::write(agents_dir.path().join("agent0.md"), "# changed").unwrap();
        let err = cache.load(agents_dir.path(), 8).unwrap_err();
        assert!(matches!(
            err,
            Error::CacheInvalid(CacheMissReason::HashMismatch)
        ));
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let (cache_dir, agents_dir, entries) = setup(8, 2);
        let cache = CapabilityCache::new(cache_dir.path().to_path_buf());
        let hash = compute_content_hash(agents_dir.path()).unwrap();
        cache
            .save(&entries, 8, &hash, agents_dir.path(), "mock", 1)
            .unwrap();
        let err = cache.load(agents_dir.path(), 16).unwrap_err();
        assert!(matches!(
            err,
            Error::CacheInvalid(CacheMissReason::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn corrupt_embeddings_file_is_a_cache_miss() {
        let (cache_dir, agents_dir, entries) = setup(8, 1);
        let cache = CapabilityCache::new(cache_dir.path().to_path_buf());
        let hash = compute_content_hash(agents_dir.path()).unwrap();
        cache
            .save(&entries, 8, &hash, agents_dir.path(), "mock", 1)
            .unwrap();
        std::fs::write(cache_dir.path().join(EMBEDDINGS_FILE), "{broken").unwrap();
        let err = cache.load(agents_dir.path(), 8).unwrap_err();
        assert!(matches!(
            err,
            Error::CacheInvalid(CacheMissReason::Corrupt(_))
        ));
    }

    #[test]
    fn orphan_sweep_removes_temp_files() {
        let (cache_dir, _, _) = setup(8, 0);
        let cache = CapabilityCache::new(cache_dir.path().to_path_buf());
        let orphan = cache_dir.path().join("embeddings.json.dead.tmp");
        std::fs::write(&orphan, "partial").unwrap();
        cache.sweep_orphans().unwrap();
        assert!(!orphan.exists());
    }
}
