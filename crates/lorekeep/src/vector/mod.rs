//! Vector index gateway
//!
//! One collection per deployment, one partition per tenant. Vectors carry
//! `(document_id, chunk_index)` references; the chunk text itself lives only
//! in the metadata DB. Primary keys are a deterministic injection of
//! `(document_id, chunk_index)` so re-indexing is idempotent.

mod local;

use async_trait::async_trait;

use crate::error::Result;

pub use local::LocalVectorIndex;

/// A vector queued for upsert
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub document_id: i64,
    pub chunk_index: i64,
    pub embedding: Vec<f32>,
}

/// A search hit: score in [0,1], higher is more relevant
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub document_id: i64,
    pub chunk_index: i64,
    pub score: f32,
}

/// Partition name for a tenant.
pub fn partition_name(owner_id: i64) -> String {
    format!("tenant_{owner_id}")
}

/// Deterministic primary key for a chunk vector; makes upserts idempotent.
pub fn vector_pk(document_id: i64, chunk_index: i64) -> i64 {
    document_id * 1_000_000 + chunk_index
}

/// Partitioned vector store behind a narrow interface.
///
/// Scores are cosine-like in [0,1] after normalization. Result ordering is
/// deterministic: score descending, then `(document_id, chunk_index)`
/// ascending on ties.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent collection creation. Fails loudly with `DimensionMismatch`
    /// when a collection already exists with a different dimension.
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Idempotent per-tenant partition creation.
    async fn ensure_partition(&self, owner_id: i64) -> Result<()>;

    /// Delete-by-key then insert for each record.
    async fn upsert(&self, owner_id: i64, records: &[VectorRecord]) -> Result<()>;

    /// Drop every vector of a document from the owner's partition.
    async fn delete_by_document(&self, owner_id: i64, document_id: i64) -> Result<()>;

    /// Drop a single chunk's vector.
    async fn delete_chunk(&self, owner_id: i64, document_id: i64, chunk_index: i64) -> Result<()>;

    /// Search the named partitions; an empty `owner_ids` slice means every
    /// partition (administrator cross-tenant search).
    async fn search(
        &self,
        owner_ids: &[i64],
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>>;

    /// Vector count in a tenant's partition, for diagnostics and tests.
    async fn partition_size(&self, owner_id: i64) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pk_is_injective_for_realistic_ranges() {
        assert_eq!(vector_pk(1, 0), 1_000_000);
        assert_eq!(vector_pk(1, 999_999), 1_999_999);
        assert_ne!(vector_pk(1, 2), vector_pk(2, 1));
    }

    #[test]
    fn partition_naming() {
        assert_eq!(partition_name(7), "tenant_7");
    }
}
