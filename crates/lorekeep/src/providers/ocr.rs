//! OCR engine client
//!
//! Invoked only when the PDF converter ladder yields text below the
//! configured floor, which usually means a scanned document.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::OcrConfig;
use crate::error::{Error, Result};

/// Trait for extracting Markdown text from scanned PDFs
#[async_trait]
pub trait Ocr: Send + Sync {
    async fn extract(&self, pdf_bytes: &[u8], languages: &[String]) -> Result<String>;

    /// Connectivity check for the diagnostics endpoint
    async fn probe(&self) -> Result<()>;

    /// Engine name for logging and diagnostics
    fn name(&self) -> &str;
}

/// HTTP OCR engine: raw PDF body in, `{"text": ...}` out.
pub struct HttpOcr {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOcr {
    pub fn new(cfg: &OcrConfig) -> Result<Self> {
        let base_url = cfg
            .base_url
            .as_deref()
            .ok_or_else(|| Error::validation("OCR enabled but base_url missing"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Ocr for HttpOcr {
    async fn extract(&self, pdf_bytes: &[u8], languages: &[String]) -> Result<String> {
        let url = format!("{}/ocr", self.base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("languages", languages.join(","))])
            .header("content-type", "application/pdf")
            .body(pdf_bytes.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_unavailable(format!(
                "OCR engine returned {status}: {body}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::provider_bad_response(e.to_string()))?;
        data.get("text")
            .or_else(|| data.get("markdown"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::provider_bad_response("missing text field in OCR response"))
    }

    async fn probe(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::provider_unavailable(format!(
                "OCR engine returned {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
