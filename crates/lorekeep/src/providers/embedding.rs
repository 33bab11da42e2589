//! Embedding providers
//!
//! All variants produce L2-normalized vectors of a fixed dimension; the
//! dimension is deployment-wide and checked against the vector collection at
//! startup.

use async_trait::async_trait;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Trait for generating text embeddings
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension
    fn dimension(&self) -> usize;

    /// Connectivity check for the diagnostics endpoint
    async fn probe(&self) -> Result<()>;

    /// Provider name for logging and diagnostics
    fn name(&self) -> &str;
}

/// Build the configured embedder variant.
pub fn from_config(cfg: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match cfg.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(cfg.dimension))),
        "local" => Ok(Box::new(LocalEmbedder::new(cfg)?)),
        "openai" => Ok(Box::new(HttpEmbedder::new(cfg)?)),
        other => Err(Error::validation(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Deterministic, dependency-free embedder for bring-up and tests.
///
/// Vectors are derived from overlapping word-bigram hashes so that texts
/// sharing vocabulary land near each other. Retrieval quality is poor; not
/// intended for production.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let words: Vec<String> = text
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|w| !w.is_empty())
            .collect();

        let mut bump = |token: &str, weight: f32| {
            let digest = Sha256::digest(token.as_bytes());
            let idx = u64::from_le_bytes(digest[..8].try_into().unwrap_or([0; 8]))
                as usize
                % self.dimension;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign * weight;
        };

        for word in &words {
            bump(word, 1.0);
        }
        for pair in words.windows(2) {
            bump(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        if words.is_empty() {
            // Fall back to byte hashing so empty-vocabulary inputs still
            // produce a stable non-zero vector.
            let digest = Sha256::digest(text.as_bytes());
            for (i, v) in vector.iter_mut().enumerate() {
                *v = (digest[i % digest.len()] as f32 / 255.0) * 2.0 - 1.0;
            }
        }

        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Local model runtime (Ollama-style `/api/embeddings` endpoint).
pub struct LocalEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl LocalEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            dimension: cfg.dimension,
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_unavailable(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::provider_bad_response(e.to_string()))?;
        let mut vector: Vec<f32> = data
            .get("embedding")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::provider_bad_response("missing embedding field"))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::provider_unavailable(format!(
                "embedding runtime returned {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// OpenAI-compatible HTTP embedder (`/v1/embeddings`).
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            dimension: cfg.dimension,
        })
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .request(&url)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_unavailable(format!(
                "embedding endpoint returned {status}: {body}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::provider_bad_response(e.to_string()))?;
        let items = data
            .get("data")
            .and_then(|v| v.as_array())
            .ok_or_else(|| Error::provider_bad_response("missing data field"))?;

        let mut out = vec![Vec::new(); texts.len()];
        for item in items {
            let idx = item.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let mut vector: Vec<f32> = item
                .get("embedding")
                .and_then(|v| v.as_array())
                .ok_or_else(|| Error::provider_bad_response("missing embedding field"))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            if vector.len() != self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
            l2_normalize(&mut vector);
            if idx < out.len() {
                out[idx] = vector;
            }
        }
        if out.iter().any(|v| v.is_empty()) {
            return Err(Error::provider_bad_response(
                "embedding response missing entries",
            ));
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn probe(&self) -> Result<()> {
        let result = self
            .embed(&["probe".to_string()])
            .await?;
        if result.len() == 1 {
            Ok(())
        } else {
            Err(Error::provider_bad_response("probe returned no vector"))
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}
