//! Episode store over the vector index and compression manager.

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::retrieval::{RetrievalOptions, RetrievedEpisode};
use super::types::Episode;
use crate::compress::{CompressionConfig, CompressionManager};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::{HnswConfig, HnswIndex};

/// Retrieval cache entries.
const CACHE_ENTRIES: usize = 512;

/// Retrieval cache TTL.
const CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedQuery {
    results: Vec<RetrievedEpisode>,
    cached_at: Instant,
}

/// New-episode input.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub task_text: String,
    pub answer_text: String,
    pub agent_type: String,
    pub reasoning_trace: Option<String>,
    pub domain: String,
    pub tags: Vec<String>,
}

/// Content-addressed store of episodes and their vectors.
pub struct EpisodeStore {
    episodes: HashMap<Uuid, Episode>,
    index: HnswIndex,
    compression: CompressionManager,
    query_cache: Mutex<LruCache<String, CachedQuery>>,
}

impl EpisodeStore {
    #[must_use]
    pub fn new(index_config: HnswConfig, compression_config: CompressionConfig) -> Self {
        let capacity = NonZeroUsize::new(CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            episodes: HashMap::new(),
            index: HnswIndex::new(index_config),
            compression: CompressionManager::new(compression_config),
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Store with default index/compression config for a dimension.
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self::new(HnswConfig::new(dimension), CompressionConfig::new(dimension))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, episode_id: &Uuid) -> Option<&Episode> {
        self.episodes.get(episode_id)
    }

    /// Iterate all episodes (unordered).
    pub fn episodes(&self) -> impl Iterator<Item = &Episode> {
        self.episodes.values()
    }

    /// Mutable access to the compression manager (tier maintenance).
    pub fn compression_mut(&mut self) -> &mut CompressionManager {
        &mut self.compression
    }

    #[must_use]
    pub fn compression(&self) -> &CompressionManager {
        &self.compression
    }

    /// Store an episode, embedding its task text.
    pub async fn store(
        &mut self,
        input: NewEpisode,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Uuid> {
        if input.task_text.trim().is_empty() {
            return Err(Error::Validation("task text is empty".into()));
        }
        let embedding = provider
            .embed_text(&input.task_text)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        self.store_embedded(input, embedding)
    }

    /// Store with a pre-computed embedding.
    ///
    /// Synchronous so daemon callers can embed outside their locks.
    pub fn store_embedded(&mut self, input: NewEpisode, embedding: Vec<f32>) -> Result<Uuid> {
        if input.task_text.trim().is_empty() {
            return Err(Error::Validation("task text is empty".into()));
        }
        let episode_id = Uuid::new_v4();
        let vector_id = episode_id.to_string();
        self.index.add(&vector_id, embedding.clone())?;
        self.compression.store(&vector_id, embedding)?;

        let episode = Episode {
            episode_id,
            task_text: input.task_text,
            answer_text: input.answer_text,
            agent_type: input.agent_type,
            reasoning_trace: input.reasoning_trace,
            domain: input.domain,
            tags: input.tags,
            created_at: Utc::now(),
            vector_id,
            successes: 0,
            failures: 0,
        };
        self.episodes.insert(episode_id, episode);
        self.invalidate_cache();
        debug!(%episode_id, total = self.episodes.len(), "episode stored");
        Ok(episode_id)
    }

    /// Record a task outcome against an episode.
    pub fn record_outcome(&mut self, episode_id: &Uuid, success: bool) -> Result<()> {
        let episode = self
            .episodes
            .get_mut(episode_id)
            .ok_or_else(|| Error::NotFound(episode_id.to_string()))?;
        if success {
            episode.successes += 1;
        } else {
            episode.failures += 1;
        }
        self.invalidate_cache();
        Ok(())
    }

    /// Delete an episode and its vector.
    pub fn delete(&mut self, episode_id: &Uuid) -> Result<()> {
        let episode = self
            .episodes
            .remove(episode_id)
            .ok_or_else(|| Error::NotFound(episode_id.to_string()))?;
        self.index.remove(&episode.vector_id)?;
        self.compression.remove(&episode.vector_id);
        self.invalidate_cache();
        Ok(())
    }

    /// Episodes in one domain, newest first.
    #[must_use]
    pub fn get_by_domain(&self, domain: &str) -> Vec<&Episode> {
        let mut hits: Vec<&Episode> = self
            .episodes
            .values()
            .filter(|e| e.domain == domain)
            .collect();
        hits.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        hits
    }

    /// Episodes carrying all of the given tags, newest first.
    #[must_use]
    pub fn get_by_tags(&self, tags: &[String]) -> Vec<&Episode> {
        let mut hits: Vec<&Episode> = self
            .episodes
            .values()
            .filter(|e| tags.iter().all(|t| e.tags.contains(t)))
            .collect();
        hits.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        hits
    }

    /// Retrieve episodes relevant to a query.
    ///
    /// Embeds the query, searches the index with the re-rank candidate
    /// count, drops hits under the domain similarity threshold, enhances
    /// with outcome history, applies the injection filter, and caps at
    /// the phase window.
    pub async fn retrieve(
        &self,
        query_text: &str,
        options: &RetrievalOptions,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<RetrievedEpisode>> {
        if query_text.trim().is_empty() {
            return Err(Error::Validation("query text is empty".into()));
        }
        if let Some(cached) = self.cached(query_text, options) {
            return Ok(cached);
        }
        let query = provider
            .embed_text(query_text)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        self.retrieve_embedded(query_text, &query, options)
    }

    /// Retrieve with a pre-computed query embedding.
    ///
    /// Synchronous so daemon callers can embed outside their locks.
    pub fn retrieve_embedded(
        &self,
        query_text: &str,
        query: &[f32],
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedEpisode>> {
        if let Some(cached) = self.cached(query_text, options) {
            return Ok(cached);
        }
        let hits = self.index.search(query, options.candidate_count())?;

        let threshold = options.similarity_threshold();
        let mut results: Vec<RetrievedEpisode> = hits
            .into_iter()
            .filter_map(|hit| {
                let episode_id = Uuid::parse_str(&hit.id).ok()?;
                let episode = self.episodes.get(&episode_id)?;
                if let Some(domain) = &options.domain {
                    if &episode.domain != domain {
                        return None;
                    }
                }
                let similarity = 1.0 - hit.distance;
                (similarity >= threshold)
                    .then(|| RetrievedEpisode::enhance(episode.clone(), similarity))
            })
            .collect();

        if let Some(min_confidence) = options.min_confidence {
            results.retain(|r| r.confidence >= min_confidence);
        }
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(options.effective_k());

        self.query_cache.lock().put(
            Self::cache_key(query_text, options),
            CachedQuery {
                results: results.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(results)
    }

    /// Evict a fraction of episodes, least recently used first.
    ///
    /// Recency comes from the compression manager's access records; an
    /// episode whose vector was never retrieved ranks by creation time.
    pub fn evict_fraction(&mut self, fraction: f64) -> u64 {
        let target = ((self.episodes.len() as f64) * fraction).ceil() as usize;
        if target == 0 {
            return 0;
        }
        let mut ranked: Vec<(Uuid, chrono::DateTime<Utc>)> = self
            .episodes
            .values()
            .map(|e| {
                let last = self
                    .compression
                    .last_access_of(&e.vector_id)
                    .unwrap_or(e.created_at);
                (e.episode_id, last)
            })
            .collect();
        ranked.sort_by_key(|(_, last)| *last);

        let victims: Vec<Uuid> = ranked.into_iter().take(target).map(|(id, _)| id).collect();
        let mut evicted = 0u64;
        for id in victims {
            if self.delete(&id).is_ok() {
                evicted += 1;
            }
        }
        evicted
    }

    fn cache_key(query_text: &str, options: &RetrievalOptions) -> String {
        format!(
            "{query_text}\u{1}{}\u{1}{}\u{1}{:?}",
            options.k,
            options.domain.as_deref().unwrap_or(""),
            options.phase
        )
    }

    fn cached(&self, query_text: &str, options: &RetrievalOptions) -> Option<Vec<RetrievedEpisode>> {
        let key = Self::cache_key(query_text, options);
        let mut cache = self.query_cache.lock();
        let cached = cache.get(&key)?;
        (cached.cached_at.elapsed() < CACHE_TTL).then(|| cached.results.clone())
    }

    fn invalidate_cache(&mut self) {
        self.query_cache.lock().clear();
    }
}
