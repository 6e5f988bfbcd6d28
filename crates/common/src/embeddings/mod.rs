//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible endpoints (text-embedding-3-small, text-embedding-3-large)
//! - A deterministic mock for tests and offline runs
//! - A caching wrapper that memoizes vectors across sessions

use crate::cache::{get_json, keys, set_json, CacheStore};
use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Encode texts into one vector each, returning the tokens consumed
    async fn encode(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    total_tokens: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(api_key: String, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries.max(1),
        })
    }

    /// Make request with retry
    async fn request_with_retry(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }

            match self.make_request(texts).await {
                Ok(result) => {
                    metrics::record_embedding(&self.model, texts.len(), true);
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        metrics::record_embedding(&self.model, texts.len(), false);
        Err(last_error.unwrap_or_else(|| AppError::EmbeddingError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    async fn make_request(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::EmbeddingError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: OpenAIResponse = response.json().await.map_err(|e| AppError::EmbeddingError {
            message: format!("Failed to parse response: {}", e),
        })?;

        let tokens = result.usage.map(|u| u.total_tokens).unwrap_or(0);
        Ok((result.data.into_iter().map(|e| e.embedding).collect(), tokens))
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        const BATCH_SIZE: usize = 100;

        let mut all_embeddings = Vec::with_capacity(texts.len());
        let mut total_tokens = 0;

        for chunk in texts.chunks(BATCH_SIZE) {
            let (embeddings, tokens) = self.request_with_retry(chunk).await?;
            if embeddings.len() != chunk.len() {
                return Err(AppError::EmbeddingError {
                    message: format!("Expected {} vectors, got {}", chunk.len(), embeddings.len()),
                });
            }
            all_embeddings.extend(embeddings);
            total_tokens += tokens;
        }

        Ok((all_embeddings, total_tokens))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing; vectors are derived from the text hash
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        (0..self.dimension)
            .map(|i| digest[i % digest.len()] as f32 / 255.0)
            .collect()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        let tokens = texts.iter().map(|t| t.split_whitespace().count()).sum();
        Ok((texts.iter().map(|t| self.vector(t)).collect(), tokens))
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder wrapper that memoizes vectors in a shared store
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    store: Arc<dyn CacheStore>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, store: Arc<dyn CacheStore>) -> Self {
        Self { inner, store }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, usize)> {
        let model = self.inner.model_name().to_string();
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let cached = match get_json::<Vec<f32>>(self.store.as_ref(), &keys::embedding(text, &model)).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "Embedding cache read failed, encoding instead");
                    None
                }
            };
            metrics::record_cache(cached.is_some(), "embedding");
            if cached.is_none() {
                missing.push(i);
            }
            vectors.push(cached);
        }

        let mut tokens = 0;
        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let (fresh, used) = self.inner.encode(&batch).await?;
            tokens = used;

            for (&i, vector) in missing.iter().zip(fresh) {
                let key = keys::embedding(&texts[i], &model);
                if let Err(e) = set_json(self.store.as_ref(), &key, &vector).await {
                    warn!(error = %e, "Failed to cache embedding, continuing without cache");
                }
                vectors[i] = Some(vector);
            }
        }

        let vectors = vectors
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| AppError::EmbeddingError {
                message: "Embedder returned fewer vectors than requested".to_string(),
            })?;

        Ok((vectors, tokens))
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// Create the configured embedder; `None` when the provider is `none`
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn Embedder>>> {
    match config.provider.as_str() {
        "" | "none" => Ok(None),
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Some(Arc::new(OpenAIEmbedder::new(key, config)?)))
        }
        "mock" => Ok(Some(Arc::new(MockEmbedder::new(config.dimension)))),
        other => Err(AppError::Configuration {
            message: format!("unknown embedding provider: {}", other),
        }),
    }
}
