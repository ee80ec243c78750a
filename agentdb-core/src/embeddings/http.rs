//! HTTP embedding provider against the configured endpoint.
//!
//! The endpoint accepts `{"input": [<texts>]}` and returns
//! `{"embeddings": [[f32; D], ...]}`. Responses are normalized and
//! dimension-checked before they leave this module.

#![cfg(feature = "http-embeddings")]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::provider::{utils, EmbeddingProvider};

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Provider backed by an external embedding HTTP service.
pub struct HttpEmbedder {
    endpoint: String,
    dimension: usize,
    client: reqwest::Client,
    model: String,
}

impl HttpEmbedder {
    /// Create a provider for `endpoint` producing `dimension`-sized vectors.
    pub fn new(endpoint: String, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            endpoint,
            dimension,
            client,
            model: "http-endpoint".to_string(),
        })
    }

    async fn request(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest { input: texts })
            .send()
            .await
            .context("Failed to reach embedding endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding endpoint error {status}: {body}");
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        let mut embeddings = Vec::with_capacity(parsed.embeddings.len());
        for embedding in parsed.embeddings {
            utils::validate_dimension(&embedding, self.dimension)?;
            embeddings.push(utils::normalize_vector(embedding));
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.request(vec![text.to_string()]).await?;
        embeddings
            .pop()
            .context("Embedding endpoint returned no vectors")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.request(texts.to_vec()).await?;
        if embeddings.len() != texts.len() {
            anyhow::bail!(
                "Embedding endpoint returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            );
        }
        Ok(embeddings)
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
