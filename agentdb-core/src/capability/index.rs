//! In-memory capability index with content-hash cache reuse.
//!
//! On startup the on-disk cache is validated against the agents
//! directory's content hash; any mismatch degrades to a full rebuild
//! (agent scan, embedding, atomic save). Searches fail once the index
//! has gone stale past the freshness threshold.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::cache::CapabilityCache;
use super::entry::{CapabilityEntry, Domain};
use super::hash::{compute_content_hash, hashed_files};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::vector::{cosine_similarity, validate_dimension};

/// Default staleness threshold before searches fail with `INDEX_SYNC`.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(24 * 3600);

/// One capability search hit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityHit {
    pub agent_key: String,
    pub name: String,
    pub similarity: f32,
    pub domain_overlap: bool,
    pub success_rate: f64,
}

/// Fast agent-key → capability-vector mapping.
pub struct CapabilityIndex {
    entries: HashMap<String, CapabilityEntry>,
    cache: CapabilityCache,
    agents_dir: PathBuf,
    dimension: usize,
    freshness: Duration,
    last_sync: Option<DateTime<Utc>>,
}

impl CapabilityIndex {
    #[must_use]
    pub fn new(agents_dir: PathBuf, cache_dir: PathBuf, dimension: usize) -> Self {
        Self {
            entries: HashMap::new(),
            cache: CapabilityCache::new(cache_dir),
            agents_dir,
            dimension,
            freshness: DEFAULT_FRESHNESS,
            last_sync: None,
        }
    }

    /// Override the staleness threshold.
    #[must_use]
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, agent_key: &str) -> Option<&CapabilityEntry> {
        self.entries.get(agent_key)
    }

    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = &CapabilityEntry> {
        self.entries.values()
    }

    /// Load the on-disk cache or rebuild from the agents directory.
    pub async fn load_or_rebuild(&mut self, provider: &dyn EmbeddingProvider) -> Result<()> {
        self.cache.sweep_orphans()?;
        match self.cache.load(&self.agents_dir, self.dimension) {
            Ok(entries) => {
                info!(agents = entries.len(), "capability cache hit");
                self.entries = entries;
                self.last_sync = Some(Utc::now());
                Ok(())
            }
            Err(Error::CacheInvalid(reason)) => {
                info!(%reason, "capability cache miss, rebuilding");
                self.rebuild(provider).await
            }
            Err(err) => Err(err),
        }
    }

    /// Rebuild the index from scratch and persist it atomically.
    pub async fn rebuild(&mut self, provider: &dyn EmbeddingProvider) -> Result<()> {
        let started = std::time::Instant::now();
        let definitions = scan_agents(&self.agents_dir)?;

        let mut entries = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let text = CapabilityEntry::embedding_text(
                &definition.name,
                &definition.description,
                &definition.keywords,
            );
            let embedding = provider
                .embed_text(&text)
                .await
                .map_err(|e| Error::Embedding(e.to_string()))?;
            validate_dimension(&embedding, self.dimension)?;
            entries.insert(
                definition.agent_key.clone(),
                CapabilityEntry {
                    agent_key: definition.agent_key,
                    name: definition.name,
                    description: definition.description,
                    domains: definition.domains,
                    keywords: definition.keywords,
                    embedding,
                    success_rate: 0.5,
                    task_count: 0,
                    indexed_at: Utc::now(),
                },
            );
        }

        let content_hash = compute_content_hash(&self.agents_dir)?;
        let build_duration_ms = started.elapsed().as_millis() as u64;
        if let Err(err) = self.cache.save(
            &entries,
            self.dimension,
            &content_hash,
            &self.agents_dir,
            provider.model_name(),
            build_duration_ms,
        ) {
            // A failed save degrades to in-memory only; next startup rebuilds.
            warn!(%err, "capability cache save failed");
        }

        info!(
            agents = entries.len(),
            build_duration_ms, "capability index rebuilt"
        );
        self.entries = entries;
        self.last_sync = Some(Utc::now());
        Ok(())
    }

    /// Record a task outcome against an agent, shifting its success rate.
    pub fn record_outcome(&mut self, agent_key: &str, success: bool) -> Result<()> {
        let entry = self
            .entries
            .get_mut(agent_key)
            .ok_or_else(|| Error::NotFound(agent_key.to_string()))?;
        let successes = entry.success_rate * entry.task_count as f64 + f64::from(u8::from(success));
        entry.task_count += 1;
        entry.success_rate = successes / entry.task_count as f64;
        Ok(())
    }

    fn check_freshness(&self) -> Result<()> {
        let Some(last_sync) = self.last_sync else {
            return Err(Error::IndexStale { age_secs: u64::MAX });
        };
        let age = (Utc::now() - last_sync)
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > self.freshness {
            return Err(Error::IndexStale {
                age_secs: age.as_secs(),
            });
        }
        Ok(())
    }

    /// Cosine search against every capability embedding.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        query_domains: &[Domain],
    ) -> Result<Vec<CapabilityHit>> {
        self.check_freshness()?;
        validate_dimension(query, self.dimension)?;

        let mut hits: Vec<CapabilityHit> = self
            .entries
            .values()
            .map(|entry| CapabilityHit {
                agent_key: entry.agent_key.clone(),
                name: entry.name.clone(),
                similarity: cosine_similarity(query, &entry.embedding),
                domain_overlap: entry.overlaps(query_domains),
                success_rate: entry.success_rate,
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        Ok(hits)
    }

    /// Linear domain filter, ranked by success rate.
    pub fn search_by_domain(&self, domain: Domain, k: usize) -> Result<Vec<CapabilityHit>> {
        self.check_freshness()?;
        let mut hits: Vec<CapabilityHit> = self
            .entries
            .values()
            .filter(|entry| entry.domains.contains(&domain))
            .map(|entry| CapabilityHit {
                agent_key: entry.agent_key.clone(),
                name: entry.name.clone(),
                similarity: 0.0,
                domain_overlap: true,
                success_rate: entry.success_rate,
            })
            .collect();
        hits.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
        hits.truncate(k);
        Ok(hits)
    }

    /// Force the index stale (test hook and daemon resync trigger).
    pub fn mark_stale(&mut self) {
        self.last_sync = None;
    }
}

/// A parsed agent definition file.
#[derive(Debug, Clone)]
struct AgentDefinition {
    agent_key: String,
    name: String,
    description: String,
    domains: Vec<Domain>,
    keywords: Vec<String>,
}

/// Parse every markdown file under the agents directory.
///
/// Layout per file: an optional `# Name` heading, optional `domains:` and
/// `keywords:` lines with comma-separated values, remaining lines form
/// the description.
fn scan_agents(dir: &Path) -> Result<Vec<AgentDefinition>> {
    let mut definitions = Vec::new();
    for relative in hashed_files(dir)? {
        let path = dir.join(&relative);
        let contents = std::fs::read_to_string(&path)?;
        let agent_key = relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut name = agent_key.clone();
        let mut domains = Vec::new();
        let mut keywords = Vec::new();
        let mut description_lines = Vec::new();

        for line in contents.lines() {
            let trimmed = line.trim();
            if let Some(heading) = trimmed.strip_prefix("# ") {
                name = heading.trim().to_string();
            } else if let Some(list) = trimmed.strip_prefix("domains:") {
                domains.extend(list.split(',').filter_map(Domain::parse));
            } else if let Some(list) = trimmed.strip_prefix("keywords:") {
                keywords.extend(
                    list.split(',')
                        .map(|kw| kw.trim().to_string())
                        .filter(|kw| !kw.is_empty()),
                );
            } else if !trimmed.is_empty() {
                description_lines.push(trimmed.to_string());
            }
        }

        definitions.push(AgentDefinition {
            agent_key,
            name,
            description: description_lines.join(" "),
            domains,
            keywords,
        });
    }
    Ok(definitions)
}
