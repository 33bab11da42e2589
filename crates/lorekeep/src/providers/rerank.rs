//! Rerank providers
//!
//! The "none" variant is represented by the registry holding no reranker;
//! the retrieval path skips reranking without error in that case.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::config::RerankConfig;
use crate::error::{Error, Result};

/// Trait for reordering retrieved candidates against a query.
///
/// Returns `(original_index, score)` pairs sorted by descending score.
/// Scores are comparable only within a single call.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        model: &str,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<(usize, f32)>>;

    /// Connectivity check for the diagnostics endpoint
    async fn probe(&self) -> Result<()>;

    /// Provider name for logging and diagnostics
    fn name(&self) -> &str;
}

/// OpenAI-compatible rerank endpoint (`/v1/rerank`).
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpReranker {
    pub fn new(cfg: &RerankConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .as_deref()
            .ok_or_else(|| Error::validation("rerank provider requires base_url"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }

    /// Pull a score out of one result item; servers disagree on the field name.
    fn extract_score(item: &serde_json::Value) -> Option<f32> {
        for key in ["score", "relevance_score", "relevanceScore", "relevance"] {
            if let Some(score) = item.get(key).and_then(|v| v.as_f64()) {
                return Some(score as f32);
            }
        }
        None
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        model: &str,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<(usize, f32)>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/rerank", self.base_url);
        let mut req = self.client.post(&url).json(&json!({
            "model": model,
            "query": query,
            "documents": documents,
        }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_unavailable(format!(
                "rerank endpoint returned {status}: {body}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::provider_bad_response(e.to_string()))?;

        let items = data
            .get("results")
            .or_else(|| data.get("data"))
            .and_then(|v| v.as_array());

        let mut pairs: Vec<(usize, f32)> = Vec::new();
        if let Some(items) = items {
            for item in items {
                let idx = item.get("index").and_then(|v| v.as_u64());
                let score = Self::extract_score(item);
                if let (Some(idx), Some(score)) = (idx, score) {
                    let idx = idx as usize;
                    if idx < documents.len() {
                        pairs.push((idx, score));
                    }
                }
            }
        }

        // Bare score-array fallback.
        if pairs.is_empty() {
            if let Some(scores) = data.get("scores").and_then(|v| v.as_array()) {
                pairs = scores
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.as_f64().map(|f| (i, f as f32)))
                    .collect();
            }
        }

        if pairs.is_empty() {
            return Err(Error::provider_bad_response("unrecognized rerank response"));
        }

        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(pairs)
    }

    async fn probe(&self) -> Result<()> {
        self.rerank("probe", "probe", &["probe".to_string()])
            .await
            .map(|_| ())
    }

    fn name(&self) -> &str {
        "openai"
    }
}
