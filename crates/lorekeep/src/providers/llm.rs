//! Chat LLM providers
//!
//! Two variants: a local Ollama-style runtime and any OpenAI-compatible HTTP
//! endpoint. Both fail with `ProviderUnavailable` when unreachable or when
//! the model is unknown, which the query path turns into a degraded answer.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Trait for LLM answer generation
#[async_trait]
pub trait ChatLlm: Send + Sync {
    /// Generate a completion for `prompt` with the given model and temperature.
    async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String>;

    /// Connectivity check for the diagnostics endpoint
    async fn probe(&self) -> Result<()>;

    /// Provider name for logging and diagnostics
    fn name(&self) -> &str;
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> Error {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::ProviderBusy(format!("LLM endpoint rate limited: {body}"))
    } else if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST
    {
        // Ollama reports unknown models as 404, OpenAI-compatible servers as 400.
        Error::provider_unavailable(format!("model rejected ({status}): {body}"))
    } else {
        Error::provider_bad_response(format!("LLM endpoint returned {status}: {body}"))
    }
}

/// Local model runtime (Ollama-style `/api/generate`).
pub struct LocalLlm {
    client: reqwest::Client,
    base_url: String,
}

impl LocalLlm {
    pub fn new(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.local_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ChatLlm for LocalLlm {
    async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
                "options": { "temperature": temperature },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::provider_bad_response(e.to_string()))?;
        data.get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::provider_bad_response("missing response field"))
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::provider_unavailable(format!(
                "LLM runtime returned {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// OpenAI-compatible chat completion endpoint (`/v1/chat/completions`).
pub struct OpenAiCompatLlm {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatLlm {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
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
impl ChatLlm for OpenAiCompatLlm {
    async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .request(&url)
            .json(&json!({
                "model": model,
                "messages": [{ "role": "user", "content": prompt }],
                "temperature": temperature,
                "stream": false,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::provider_bad_response(e.to_string()))?;

        let choice = data
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|c| c.first())
            .ok_or_else(|| Error::provider_bad_response("empty choices"))?;

        // Some implementations return "text" instead of message.content.
        choice
            .pointer("/message/content")
            .or_else(|| choice.get("text"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::provider_bad_response("missing completion content"))
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/v1/models", self.base_url);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::provider_unavailable(format!(
                "LLM endpoint returned {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "openai"
    }
}
