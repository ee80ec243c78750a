//! Deterministic mock embedding provider for tests.
//!
//! Produces hash-seeded, non-semantic unit vectors. Identical text always
//! embeds to the identical vector, which is what retrieval and cache
//! round-trip tests need.

use anyhow::Result;
use async_trait::async_trait;

use super::provider::{utils, EmbeddingProvider};

/// Mock provider generating deterministic embeddings from a text hash.
pub struct MockEmbedder {
    name: String,
    dimension: usize,
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            name: "mock-embedder".to_string(),
            dimension,
        }
    }

    /// Generate a deterministic unit vector for `text`.
    #[must_use]
    pub fn generate(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut seed = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let value = ((seed >> 16) as f32) / 32768.0 - 1.0;
            embedding.push(value);
        }
        utils::normalize_vector(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Test-only provider that embeds a closed set of texts to fixed vectors
/// and everything else through the hash fallback. Used to pin retrieval
/// scenarios to known geometry.
pub struct FixtureEmbedder {
    dimension: usize,
    fixtures: Vec<(String, Vec<f32>)>,
    fallback: MockEmbedder,
}

impl FixtureEmbedder {
    #[must_use]
    pub fn new(dimension: usize, fixtures: Vec<(String, Vec<f32>)>) -> Self {
        Self {
            dimension,
            fixtures,
            fallback: MockEmbedder::new(dimension),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixtureEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        for (fixture, vector) in &self.fixtures {
            if fixture == text {
                return Ok(vector.clone());
            }
        }
        Ok(self.fallback.generate(text))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "fixture-embedder"
    }

    async fn is_available(&self) -> bool {
        true
    }
}
