//! Query and reconciliation response payloads

use serde::{Deserialize, Serialize};

/// A retrieved chunk reference backing an answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySource {
    pub document_id: i64,
    pub document_name: String,
    pub chunk_index: i64,
    /// Relevance score in [0,1], higher is more relevant
    pub relevance: f32,
}

/// Answer to a knowledge-base query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub query: String,
    pub answer: String,
    pub sources: Vec<QuerySource>,
    /// Max source relevance, [0,1]
    pub confidence: f32,
    /// True when the LLM was unavailable and the answer is a fallback note
    pub degraded: bool,
}

/// Per-document outcome of a bulk reindex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexOutcome {
    pub document_id: i64,
    pub owner_id: i64,
    pub chunks_indexed: usize,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a bulk reindex run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexReport {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ReindexOutcome>,
}
