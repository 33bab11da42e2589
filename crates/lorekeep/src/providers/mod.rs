//! Provider abstractions for embeddings, LLM, rerank, PDF conversion, and OCR
//!
//! Each capability is a narrow trait with enumerated variants selected by
//! configuration. The registry is built once at startup and immutable after;
//! it owns the per-provider rate limiters.

pub mod embedding;
pub mod limit;
pub mod llm;
pub mod ocr;
pub mod pdf;
pub mod registry;
pub mod rerank;

pub use embedding::Embedder;
pub use llm::ChatLlm;
pub use ocr::Ocr;
pub use pdf::PdfToMarkdown;
pub use registry::ProviderRegistry;
pub use rerank::Reranker;
