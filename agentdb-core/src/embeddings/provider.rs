//! Embedding provider trait and common functionality.

use anyhow::Result;
use async_trait::async_trait;

/// Trait for embedding providers that convert text to vectors.
///
/// Implementations must return L2-normalized vectors of the provider's
/// declared dimension; callers validate at the boundary.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in batch.
    ///
    /// Default implementation calls `embed_text` per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(embeddings)
    }

    /// Get the embedding dimension for this provider.
    fn embedding_dimension(&self) -> usize;

    /// Get the model name/identifier.
    fn model_name(&self) -> &str;

    /// Check if the provider is available/configured.
    async fn is_available(&self) -> bool {
        self.embed_text("test").await.is_ok()
    }
}

/// Utility functions for embedding providers.
pub mod utils {
    use anyhow::Result;

    /// Normalize a vector to unit length.
    #[must_use]
    pub fn normalize_vector(mut vector: Vec<f32>) -> Vec<f32> {
        crate::vector::normalize(&mut vector);
        vector
    }

    /// Validate embedding dimension matches expected.
    pub fn validate_dimension(embedding: &[f32], expected: usize) -> Result<()> {
        if embedding.len() != expected {
            anyhow::bail!(
                "Embedding dimension mismatch: got {}, expected {}",
                embedding.len(),
                expected
            );
        }
        Ok(())
    }
}
