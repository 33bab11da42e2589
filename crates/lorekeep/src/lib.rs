//! lorekeep: multi-tenant RAG knowledge-base service
//!
//! Tenants upload documents, a background worker converts them to Markdown and
//! splits them into reviewable chunks, a reviewer approves or rejects, and
//! approved chunks are embedded into per-tenant vector partitions. Queries
//! retrieve from the caller's partition and compose an answer through a
//! pluggable LLM with `[document_id:chunk_index]` citations.
//!
//! Chunk text lives only in the metadata DB; the vector index is a derived,
//! rebuildable projection of the included chunks.

pub mod config;
pub mod convert;
pub mod error;
pub mod lifecycle;
pub mod providers;
pub mod reconcile;
pub mod retrieval;
pub mod server;
pub mod split;
pub mod storage;
pub mod types;
pub mod vector;
pub mod worker;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use types::{
    chunk::Chunk,
    document::{ConversionStatus, Document, DocumentStatus, FileKind},
    tenant::{Role, Tenant},
};
