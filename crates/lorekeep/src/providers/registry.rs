//! Provider registry: built once at startup, immutable after
//!
//! The registry owns the configured provider instances and the per-provider
//! token buckets. Everything downstream reaches providers through it so the
//! rate limits and dispatch rules live in one place.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{Error, Result};

use super::embedding::{self, Embedder};
use super::limit::TokenBucket;
use super::llm::{ChatLlm, LocalLlm, OpenAiCompatLlm};
use super::ocr::{HttpOcr, Ocr};
use super::pdf::{LayoutPdf, PdfToMarkdown, PlainTextPdf};
use super::rerank::{HttpReranker, Reranker};

/// Outcome of probing one provider, for the diagnostics endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProbeOutcome {
    pub provider: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ProviderRegistry {
    embedder: Arc<dyn Embedder>,
    llms: HashMap<String, Arc<dyn ChatLlm>>,
    default_llm_provider: String,
    reranker: Option<Arc<dyn Reranker>>,
    pdf_layout: Arc<dyn PdfToMarkdown>,
    pdf_plain: Arc<dyn PdfToMarkdown>,
    ocr: Option<Arc<dyn Ocr>>,
    ocr_languages: Vec<String>,
    min_text_chars: usize,
    embed_limiter: TokenBucket,
    llm_limiter: TokenBucket,
}

impl ProviderRegistry {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = embedding::from_config(&cfg.embeddings)?.into();

        let mut llms: HashMap<String, Arc<dyn ChatLlm>> = HashMap::new();
        llms.insert("local".to_string(), Arc::new(LocalLlm::new(&cfg.llm)?));
        if let Some(base_url) = &cfg.llm.openai_base_url {
            llms.insert(
                "openai".to_string(),
                Arc::new(OpenAiCompatLlm::new(
                    base_url,
                    cfg.llm.openai_api_key.clone(),
                    cfg.llm.timeout_secs,
                )?),
            );
        }
        if !llms.contains_key(&cfg.llm.provider) {
            return Err(Error::validation(format!(
                "default LLM provider '{}' is not configured",
                cfg.llm.provider
            )));
        }

        let reranker: Option<Arc<dyn Reranker>> = match cfg.rerank.provider.as_str() {
            "none" => None,
            "openai" => Some(Arc::new(HttpReranker::new(&cfg.rerank)?)),
            other => {
                return Err(Error::validation(format!(
                    "unknown rerank provider: {other}"
                )))
            }
        };

        let ocr: Option<Arc<dyn Ocr>> = if cfg.ocr.enabled {
            Some(Arc::new(HttpOcr::new(&cfg.ocr)?))
        } else {
            None
        };

        Ok(Self {
            embedder,
            llms,
            default_llm_provider: cfg.llm.provider.clone(),
            reranker,
            pdf_layout: Arc::new(LayoutPdf),
            pdf_plain: Arc::new(PlainTextPdf),
            ocr,
            ocr_languages: cfg.ocr.languages.clone(),
            min_text_chars: cfg.ocr.min_text_chars,
            embed_limiter: TokenBucket::per_minute(cfg.embeddings.rate_limit_per_min),
            llm_limiter: TokenBucket::per_minute(cfg.llm.rate_limit_per_min),
        })
    }

    /// Build a registry around an explicit embedder; used by tests.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            llms: HashMap::new(),
            default_llm_provider: "local".to_string(),
            reranker: None,
            pdf_layout: Arc::new(LayoutPdf),
            pdf_plain: Arc::new(PlainTextPdf),
            ocr: None,
            ocr_languages: Vec::new(),
            min_text_chars: 200,
            embed_limiter: TokenBucket::per_minute(0),
            llm_limiter: TokenBucket::per_minute(0),
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Rate-limited batch embedding.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_limiter.acquire(self.embedder.name())?;
        self.embedder.embed(texts).await
    }

    /// Rate-limited completion through the named (or default) LLM provider.
    pub async fn generate(
        &self,
        provider: Option<&str>,
        model: &str,
        prompt: &str,
        temperature: f32,
    ) -> Result<String> {
        let name = provider.unwrap_or(&self.default_llm_provider);
        let llm = self
            .llms
            .get(name)
            .ok_or_else(|| Error::provider_unavailable(format!("unknown LLM provider: {name}")))?;
        self.llm_limiter.acquire(name)?;
        llm.generate(model, prompt, temperature).await
    }

    /// Rerank candidates, or None when no reranker is configured.
    pub fn reranker(&self) -> Option<&Arc<dyn Reranker>> {
        self.reranker.as_ref()
    }

    pub fn pdf_layout(&self) -> &Arc<dyn PdfToMarkdown> {
        &self.pdf_layout
    }

    pub fn pdf_plain(&self) -> &Arc<dyn PdfToMarkdown> {
        &self.pdf_plain
    }

    pub fn ocr(&self) -> Option<&Arc<dyn Ocr>> {
        self.ocr.as_ref()
    }

    pub fn ocr_languages(&self) -> &[String] {
        &self.ocr_languages
    }

    /// OCR kicks in below this many characters of extracted text.
    pub fn min_text_chars(&self) -> usize {
        self.min_text_chars
    }

    /// Probe every configured provider for the diagnostics endpoint.
    pub async fn probe_all(&self) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::new();

        let embed_result = self.embedder.probe().await;
        outcomes.push(ProbeOutcome {
            provider: format!("embedding:{}", self.embedder.name()),
            ok: embed_result.is_ok(),
            error: embed_result.err().map(|e| e.to_string()),
        });

        for (name, llm) in &self.llms {
            let result = llm.probe().await;
            outcomes.push(ProbeOutcome {
                provider: format!("llm:{name}"),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }

        if let Some(reranker) = &self.reranker {
            let result = reranker.probe().await;
            outcomes.push(ProbeOutcome {
                provider: format!("rerank:{}", reranker.name()),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }

        for pdf in [&self.pdf_layout, &self.pdf_plain] {
            let result = pdf.probe();
            outcomes.push(ProbeOutcome {
                provider: format!("pdf:{}", pdf.name()),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }

        if let Some(ocr) = &self.ocr {
            let result = ocr.probe().await;
            outcomes.push(ProbeOutcome {
                provider: format!("ocr:{}", ocr.name()),
                ok: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_registry() {
        let registry = ProviderRegistry::from_config(&AppConfig::default()).unwrap();
        assert_eq!(registry.dimension(), 384);
        assert!(registry.reranker().is_none());
        assert!(registry.ocr().is_none());
    }

    #[test]
    fn unknown_rerank_provider_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.rerank.provider = "mystery".to_string();
        assert!(ProviderRegistry::from_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn hash_embed_through_registry() {
        let registry = ProviderRegistry::from_config(&AppConfig::default()).unwrap();
        let vectors = registry.embed(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 384);
    }

    #[tokio::test]
    async fn probe_all_covers_pdf_engines() {
        let registry = ProviderRegistry::from_config(&AppConfig::default()).unwrap();
        let outcomes = registry.probe_all().await;
        let pdf: Vec<_> = outcomes
            .iter()
            .filter(|o| o.provider.starts_with("pdf:"))
            .collect();
        assert_eq!(pdf.len(), 2);
        assert!(pdf.iter().all(|o| o.ok));
    }
}
