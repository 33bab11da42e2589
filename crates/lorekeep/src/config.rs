//! Configuration for the knowledge-base service
//!
//! Every section has sensible defaults so the service can start with a
//! filesystem object store, the hash embedder, and the in-process vector
//! index. A JSON config file overrides the defaults section by section.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::split::SplitStrategy;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub object_store: ObjectStoreConfig,
    pub vector: VectorConfig,
    pub chunking: ChunkingConfig,
    pub embeddings: EmbeddingConfig,
    pub llm: LlmConfig,
    pub rerank: RerankConfig,
    pub ocr: OcrConfig,
    pub conversion: ConversionConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .map_err(|e| Error::validation(format!("cannot read config {}: {e}", p.display())))?;
                serde_json::from_str(&raw)
                    .map_err(|e| Error::validation(format!("invalid config {}: {e}", p.display())))
            }
            None => Ok(Self::default()),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
    /// Request deadline applied to provider calls on the query path, seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 50 * 1024 * 1024,
            request_timeout_secs: 120,
        }
    }
}

/// Metadata DB location. The conversion queue lives in the same file so the
/// server and the worker binary share it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/lorekeep.db"),
        }
    }
}

/// Object store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreBackend {
    Filesystem,
    Gcs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub backend: ObjectStoreBackend,
    /// Root directory for the filesystem backend
    pub root: PathBuf,
    /// Bucket name for the GCS backend
    pub bucket: String,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            backend: ObjectStoreBackend::Filesystem,
            root: PathBuf::from("data/blobs"),
            bucket: "lorekeep".to_string(),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Snapshot file for the in-process index; empty disables persistence
    pub snapshot_path: Option<PathBuf>,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            snapshot_path: Some(PathBuf::from("data/vectors.json")),
        }
    }
}

/// Chunk splitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub strategy: SplitStrategy,
    /// Target chunk size: characters, or tokens for the token-aware strategy
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, percent of chunk_size, 0..=90
    pub overlap_percent: u8,
    /// Ordered separator list used by the recursive strategy
    pub delimiters: Vec<String>,
    /// How many leading chunks feed the document preview
    pub preview_chunks: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: SplitStrategy::FixedChar,
            chunk_size: 512,
            overlap_percent: 10,
            delimiters: vec![
                "\n\n".to_string(),
                "\n".to_string(),
                ". ".to_string(),
                " ".to_string(),
            ],
            preview_chunks: 3,
        }
    }
}

impl ChunkingConfig {
    pub fn split_config(&self) -> crate::split::SplitConfig {
        crate::split::SplitConfig {
            strategy: self.strategy,
            chunk_size: self.chunk_size,
            overlap_percent: self.overlap_percent,
            delimiters: self.delimiters.clone(),
        }
    }
}

/// Embedding provider configuration. The dimension is deployment-wide: the
/// vector collection is created with it and a mismatch is fatal at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "hash" | "local" | "openai"
    pub provider: String,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Token-bucket rate limit, calls per minute (0 disables)
    pub rate_limit_per_min: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 384,
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            timeout_secs: 60,
            rate_limit_per_min: 0,
        }
    }
}

/// Chat LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Default provider: "local" (Ollama-style runtime) | "openai"
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    /// Ollama-style runtime base URL
    pub local_base_url: String,
    /// OpenAI-compatible endpoint base URL
    pub openai_base_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub timeout_secs: u64,
    /// Token-bucket rate limit, calls per minute (0 disables)
    pub rate_limit_per_min: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "qwen2.5:7b".to_string(),
            temperature: 0.7,
            local_base_url: "http://localhost:11434".to_string(),
            openai_base_url: None,
            openai_api_key: None,
            timeout_secs: 120,
            rate_limit_per_min: 0,
        }
    }
}

/// Rerank provider configuration ("none" skips reranking without error)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    /// "none" | "openai"
    pub provider: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            base_url: None,
            api_key: None,
            model: None,
            timeout_secs: 60,
        }
    }
}

/// OCR engine configuration. OCR runs only when the PDF converter ladder
/// yields less than `min_text_chars` characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub languages: Vec<String>,
    pub min_text_chars: usize,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            languages: vec!["en".to_string()],
            min_text_chars: 200,
            timeout_secs: 300,
        }
    }
}

/// Conversion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    /// Worker pool size; 0 means min(cpu count, 4)
    pub workers: usize,
    /// Hard per-job time limit, seconds
    pub job_timeout_secs: u64,
    /// Automatic retries for transient failures
    pub max_retries: u32,
    /// Base delay for exponential retry backoff, seconds
    pub retry_backoff_secs: u64,
    /// Bounded queue depth; uploads wait when the queue is full
    pub queue_capacity: usize,
    /// Worker poll interval when the queue is empty, milliseconds
    pub poll_interval_ms: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            job_timeout_secs: 600,
            max_retries: 3,
            retry_backoff_secs: 60,
            queue_capacity: 256,
            poll_interval_ms: 500,
        }
    }
}

impl ConversionConfig {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            num_cpus::get().min(4)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.embeddings.provider, "hash");
        assert_eq!(cfg.ocr.min_text_chars, 200);
        assert_eq!(cfg.conversion.max_retries, 3);
        assert!(cfg.conversion.effective_workers() >= 1);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).expect("parse");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.chunking.chunk_size, 512);
    }
}
