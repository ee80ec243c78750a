//! Graduated-confidence routing over the capability index.
//!
//! A task is embedded (cached for identical text), scored against every
//! candidate agent, and pushed through a softmax. The max probability is
//! the routing confidence; normalized entropy is the uncertainty. The
//! confidence maps to a confirmation level with left-closed bands.

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tracing::debug;

use crate::capability::{CapabilityIndex, Domain};
use crate::embeddings::EmbeddingProvider;
use crate::error::{Error, Result};

/// Cached task embeddings.
const EMBED_CACHE_SIZE: usize = 256;

/// Alternatives surfaced when the user must select.
const SELECT_ALTERNATIVES: usize = 5;

/// How a routing decision is confirmed with the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    /// Execute silently
    Auto,
    /// Display the choice; proceed after a short timeout
    Show,
    /// Require explicit confirmation
    Confirm,
    /// Require a choice from the top alternatives
    Select,
}

impl ConfirmationLevel {
    /// Map a confidence to its band. Bands are left-closed/right-open:
    /// `[0.9, 1]` auto, `[0.7, 0.9)` show, `[0.5, 0.7)` confirm,
    /// below `0.5` select.
    #[must_use]
    pub fn for_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            Self::Auto
        } else if confidence >= 0.7 {
            Self::Show
        } else if confidence >= 0.5 {
            Self::Confirm
        } else {
            Self::Select
        }
    }
}

/// Score weighting between vector similarity, domain overlap, and
/// historical success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingWeights {
    pub vector: f64,
    pub domain: f64,
    pub history: f64,
}

impl Default for RoutingWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            domain: 0.25,
            history: 0.15,
        }
    }
}

/// Routing engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub weights: RoutingWeights,
    /// Candidates considered per decision
    pub top_k: usize,
    /// Minimum similarity before a candidate counts at all
    pub min_similarity: f32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            weights: RoutingWeights::default(),
            top_k: 5,
            min_similarity: 0.2,
        }
    }
}

/// One scored candidate agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCandidate {
    pub agent_key: String,
    pub name: String,
    pub similarity: f32,
    pub domain_overlap: bool,
    pub success_rate: f64,
    pub score: f64,
    pub probability: f64,
}

/// A full routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    pub selected: RouteCandidate,
    pub confidence: f64,
    pub uncertainty: f64,
    pub level: ConfirmationLevel,
    /// Remaining candidates, best first (all of them for `Select`)
    pub alternatives: Vec<RouteCandidate>,
}

/// Routes tasks to agents via the capability index.
pub struct RoutingEngine {
    config: RoutingConfig,
    embed_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl RoutingEngine {
    #[must_use]
    pub fn new(config: RoutingConfig) -> Self {
        let capacity = NonZeroUsize::new(EMBED_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            embed_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Embed a task, reusing the cache for identical text.
    pub async fn embed_task(
        &self,
        task: &str,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<f32>> {
        if let Some(cached) = self.embed_cache.lock().get(task) {
            return Ok(cached.clone());
        }
        let embedding = provider
            .embed_text(task)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;
        self.embed_cache
            .lock()
            .put(task.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Route a task to the best agent.
    pub async fn route(
        &self,
        task: &str,
        task_domains: &[Domain],
        provider: &dyn EmbeddingProvider,
        index: &CapabilityIndex,
    ) -> Result<RoutingDecision> {
        if task.trim().is_empty() {
            return Err(Error::Validation("task text is empty".into()));
        }
        let query = self.embed_task(task, provider).await?;
        self.route_embedded(task, &query, task_domains, index)
    }

    /// Route with a pre-computed task embedding.
    ///
    /// Synchronous so daemon callers can embed outside their locks.
    pub fn route_embedded(
        &self,
        task: &str,
        query: &[f32],
        task_domains: &[Domain],
        index: &CapabilityIndex,
    ) -> Result<RoutingDecision> {
        if task.trim().is_empty() {
            return Err(Error::Validation("task text is empty".into()));
        }
        let hits = index.search(query, self.config.top_k, task_domains)?;

        let weights = &self.config.weights;
        let mut candidates: Vec<RouteCandidate> = hits
            .into_iter()
            .filter(|hit| hit.similarity >= self.config.min_similarity)
            .map(|hit| {
                let score = weights.vector * f64::from(hit.similarity)
                    + weights.domain * f64::from(u8::from(hit.domain_overlap))
                    + weights.history * hit.success_rate;
                RouteCandidate {
                    agent_key: hit.agent_key,
                    name: hit.name,
                    similarity: hit.similarity,
                    domain_overlap: hit.domain_overlap,
                    success_rate: hit.success_rate,
                    score,
                    probability: 0.0,
                }
            })
            .collect();

        if candidates.is_empty() {
            return Err(Error::NoAgent);
        }

        softmax(&mut candidates);
        candidates.sort_by(|a, b| b.probability.total_cmp(&a.probability));

        let confidence = candidates[0].probability;
        let uncertainty = normalized_entropy(&candidates);
        let level = ConfirmationLevel::for_confidence(confidence);

        let selected = candidates.remove(0);
        let alternatives = match level {
            ConfirmationLevel::Select => {
                candidates.truncate(SELECT_ALTERNATIVES);
                candidates
            }
            _ => {
                candidates.truncate(SELECT_ALTERNATIVES.saturating_sub(1));
                candidates
            }
        };

        debug!(
            task_len = task.len(),
            agent = %selected.agent_key,
            confidence,
            uncertainty,
            ?level,
            "routed task"
        );

        Ok(RoutingDecision {
            selected,
            confidence,
            uncertainty,
            level,
            alternatives,
        })
    }
}

/// In-place softmax over candidate scores.
fn softmax(candidates: &mut [RouteCandidate]) {
    let max_score = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for candidate in candidates.iter_mut() {
        candidate.probability = (candidate.score - max_score).exp();
        total += candidate.probability;
    }
    for candidate in candidates.iter_mut() {
        candidate.probability /= total;
    }
}

/// Shannon entropy of the probability distribution, normalized to [0, 1].
fn normalized_entropy(candidates: &[RouteCandidate]) -> f64 {
    if candidates.len() <= 1 {
        return 0.0;
    }
    let entropy: f64 = candidates
        .iter()
        .filter(|c| c.probability > 0.0)
        .map(|c| -c.probability * c.probability.ln())
        .sum();
    entropy / (candidates.len() as f64).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityIndex;
    use crate::embeddings::MockEmbedder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn confirmation_bands_are_left_closed() {
        assert_eq!(ConfirmationLevel::for_confidence(0.90), ConfirmationLevel::Auto);
        assert_eq!(ConfirmationLevel::for_confidence(0.92), ConfirmationLevel::Auto);
        assert_eq!(ConfirmationLevel::for_confidence(0.80), ConfirmationLevel::Show);
        assert_eq!(ConfirmationLevel::for_confidence(0.70), ConfirmationLevel::Show);
        assert_eq!(ConfirmationLevel::for_confidence(0.60), ConfirmationLevel::Confirm);
        assert_eq!(ConfirmationLevel::for_confidence(0.50), ConfirmationLevel::Confirm);
        assert_eq!(ConfirmationLevel::for_confidence(0.49), ConfirmationLevel::Select);
        assert_eq!(ConfirmationLevel::for_confidence(0.40), ConfirmationLevel::Select);
    }

    #[test]
    fn softmax_sums_to_one() {
        let mut candidates: Vec<RouteCandidate> = [1.0, 0.5, 0.1]
            .iter()
            .map(|&score| RouteCandidate {
                agent_key: "a".into(),
                name: "a".into(),
                similarity: 0.0,
                domain_overlap: false,
                success_rate: 0.0,
                score,
                probability: 0.0,
            })
            .collect();
        softmax(&mut candidates);
        let total: f64 = candidates.iter().map(|c| c.probability).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(candidates[0].probability > candidates[1].probability);
    }

    struct CountingEmbedder {
        inner: MockEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed_text(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_text(text).await
        }
        fn embedding_dimension(&self) -> usize {
            self.inner.embedding_dimension()
        }
        fn model_name(&self) -> &str {
            "counting"
        }
    }

    async fn fixture_index(dim: usize) -> (CapabilityIndex, TempDir, TempDir) {
        let agents = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        for (key, domains) in [("coder", "coding"), ("writer", "writing")] {
            std::fs::write(
                agents.path().join(format!("{key}.md")),
                format!("# {key}\ndomains: {domains}\nHandles {key} tasks"),
            )
            .unwrap();
        }
        let mut index = CapabilityIndex::new(
            agents.path().to_path_buf(),
            cache.path().to_path_buf(),
            dim,
        );
        index.load_or_rebuild(&MockEmbedder::new(dim)).await.unwrap();
        (index, agents, cache)
    }

    #[tokio::test]
    async fn identical_tasks_hit_the_embed_cache() {
        let (index, _a, _c) = fixture_index(32).await;
        let engine = RoutingEngine::new(RoutingConfig {
            min_similarity: -1.0,
            ..RoutingConfig::default()
        });
        let provider = CountingEmbedder {
            inner: MockEmbedder::new(32),
            calls: AtomicUsize::new(0),
        };
        engine.route("fix the build", &[], &provider, &index).await.unwrap();
        engine.route("fix the build", &[], &provider, &index).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_candidate_over_threshold_is_no_agent() {
        let (index, _a, _c) = fixture_index(32).await;
        let engine = RoutingEngine::new(RoutingConfig {
            min_similarity: 0.999,
            ..RoutingConfig::default()
        });
        let err = engine
            .route("unrelated task", &[], &MockEmbedder::new(32), &index)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAgent));
    }

    #[tokio::test]
    async fn empty_task_is_rejected() {
        let (index, _a, _c) = fixture_index(32).await;
        let engine = RoutingEngine::new(RoutingConfig::default());
        let err = engine
            .route("  ", &[], &MockEmbedder::new(32), &index)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn decision_carries_alternatives_and_level() {
        let (index, _a, _c) = fixture_index(32).await;
        let engine = RoutingEngine::new(RoutingConfig {
            min_similarity: -1.0,
            ..RoutingConfig::default()
        });
        let decision = engine
            .route("draft a post", &[Domain::Writing], &MockEmbedder::new(32), &index)
            .await
            .unwrap();
        assert!(decision.confidence > 0.0 && decision.confidence <= 1.0);
        assert!(decision.uncertainty >= 0.0 && decision.uncertainty <= 1.0);
        assert_eq!(decision.alternatives.len(), 1);
        // Two candidates with similar scores: never an auto decision.
        assert_ne!(decision.level, ConfirmationLevel::Auto);
    }
}
