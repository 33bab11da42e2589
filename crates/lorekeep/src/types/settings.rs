//! Per-tenant retrieval defaults

use serde::{Deserialize, Serialize};

/// Defaults applied to the query path when a request leaves a knob unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    pub llm_provider: String,
    pub llm_model: String,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub top_k: i64,
    pub temperature: f32,
    pub rerank_enabled: bool,
    pub rerank_provider: String,
    pub rerank_model: Option<String>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            llm_provider: "local".to_string(),
            llm_model: "qwen2.5:7b".to_string(),
            embedding_provider: "hash".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            top_k: 5,
            temperature: 0.7,
            rerank_enabled: false,
            rerank_provider: "none".to_string(),
            rerank_model: None,
        }
    }
}
