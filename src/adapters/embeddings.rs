//! Sentence-embedding client for an OpenAI-compatible `/embeddings` endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NarrativeConfig;
use crate::error::{Result, WalterError};

/// Maps texts to fixed-dimension vectors, one per input, in input order
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct HttpEmbedder {
    http: Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(config: &NarrativeConfig, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| WalterError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: format!("{}/embeddings", config.embedding_url.trim_end_matches('/')),
            model: config.embedding_model.clone(),
            api_key: config.embedding_api_key.clone().filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.http.post(&self.url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| WalterError::Embedding(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Embedding API error: {} - {}", status, body);
            return Err(WalterError::Embedding(format!("API error {}: {}", status, body)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| WalterError::Embedding(format!("failed to parse response: {}", e)))?;

        let vectors = order_embeddings(parsed.data, texts.len())?;
        debug!(
            "Embedded {} texts (dim {})",
            vectors.len(),
            vectors.first().map_or(0, Vec::len)
        );
        Ok(vectors)
    }
}

/// Restore input order from the `index` field and check shape
fn order_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(WalterError::Embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            items.len()
        )));
    }
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }

    let vectors: Vec<Vec<f32>> = items.into_iter().map(|item| item.embedding).collect();
    let dim = vectors.first().map_or(0, Vec::len);
    if dim == 0 || vectors.iter().any(|v| v.len() != dim) {
        return Err(WalterError::Embedding("inconsistent embedding dimensions".to_string()));
    }
    Ok(vectors)
}

/// Scale a vector to unit length; zero vectors are left untouched
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
}
