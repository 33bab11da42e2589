//! Reconciliation service
//!
//! The vector index is a derived projection of the chunk store; edits made
//! without vector sync, provider changes, or index loss all leave it stale.
//! Rebuilding deletes a document's vectors and re-embeds its included
//! chunks, restoring the index-superset invariant. The bulk form walks a
//! document filter sequentially and reports per-document outcomes.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::providers::ProviderRegistry;
use crate::retrieval::RetrievalService;
use crate::storage::MetadataDb;
use crate::types::document::DocumentStatus;
use crate::types::response::{ReindexOutcome, ReindexReport};
use crate::types::tenant::Tenant;
use crate::vector::{VectorIndex, VectorRecord};

/// Bulk reindex selection
#[derive(Debug, Clone, Default)]
pub struct ReindexFilter {
    pub owner_id: Option<i64>,
    pub status_in: Option<Vec<DocumentStatus>>,
    pub document_ids: Option<Vec<i64>>,
}

pub struct ReconcileService {
    db: Arc<MetadataDb>,
    vector: Arc<dyn VectorIndex>,
    providers: Arc<ProviderRegistry>,
    retrieval: Arc<RetrievalService>,
}

impl ReconcileService {
    pub fn new(
        db: Arc<MetadataDb>,
        vector: Arc<dyn VectorIndex>,
        providers: Arc<ProviderRegistry>,
        retrieval: Arc<RetrievalService>,
    ) -> Self {
        Self {
            db,
            vector,
            providers,
            retrieval,
        }
    }

    /// Delete a document's vectors and re-embed its included chunks.
    /// Document status is untouched; this is a repair, not a transition.
    pub async fn rebuild_vectors(&self, actor: &Tenant, document_id: i64) -> Result<usize> {
        let document = self.db.require_document(document_id)?;
        if !actor.can_access(document.owner_id) {
            return Err(Error::forbidden("document belongs to another tenant"));
        }
        let count = self.retrieval.embed_and_store(&document).await?;
        tracing::info!(document_id, vectors = count, "vectors rebuilt");
        Ok(count)
    }

    /// Targeted re-embed of specific chunk indices of an indexed document.
    pub async fn reembed_chunks(
        &self,
        actor: &Tenant,
        document_id: i64,
        chunk_indices: &[i64],
    ) -> Result<usize> {
        let document = self.db.require_document(document_id)?;
        if !actor.can_access(document.owner_id) {
            return Err(Error::forbidden("document belongs to another tenant"));
        }
        if document.status != DocumentStatus::Indexed {
            return Err(Error::precondition("document is not indexed"));
        }
        if chunk_indices.is_empty() {
            return self.rebuild_vectors(actor, document_id).await;
        }

        let mut chunks = Vec::new();
        for &idx in chunk_indices {
            let chunk = self
                .db
                .get_chunk(document_id, idx)?
                .ok_or_else(|| Error::not_found(format!("chunk {idx} of document {document_id}")))?;
            if chunk.included {
                chunks.push(chunk);
            } else {
                // An excluded chunk has no business in the index.
                self.vector
                    .delete_chunk(document.owner_id, document_id, idx)
                    .await?;
            }
        }
        if chunks.is_empty() {
            return Ok(0);
        }

        self.vector.ensure_partition(document.owner_id).await?;
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.providers.embed(&texts).await?;
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                document_id,
                chunk_index: chunk.chunk_index,
                embedding,
            })
            .collect();
        self.vector.upsert(document.owner_id, &records).await?;
        Ok(records.len())
    }

    /// Bulk rebuild over a filter, sequential, with per-document outcomes.
    /// Defaults to every indexed document.
    pub async fn reindex(&self, actor: &Tenant, filter: &ReindexFilter) -> Result<ReindexReport> {
        if !actor.is_admin() {
            return Err(Error::forbidden("bulk reindex requires admin role"));
        }

        let statuses = filter
            .status_in
            .clone()
            .unwrap_or_else(|| vec![DocumentStatus::Indexed]);
        let documents = self.db.documents_for_reindex(
            filter.owner_id,
            &statuses,
            filter.document_ids.as_deref(),
        )?;

        let mut results = Vec::with_capacity(documents.len());
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for document in &documents {
            match self.retrieval.embed_and_store(document).await {
                Ok(count) => {
                    succeeded += 1;
                    results.push(ReindexOutcome {
                        document_id: document.id,
                        owner_id: document.owner_id,
                        chunks_indexed: count,
                        ok: true,
                        error: None,
                    });
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(document_id = document.id, "reindex entry failed: {e}");
                    results.push(ReindexOutcome {
                        document_id: document.id,
                        owner_id: document.owner_id,
                        chunks_indexed: 0,
                        ok: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        tracing::info!(
            requested = documents.len(),
            succeeded,
            failed,
            "bulk reindex finished"
        );
        Ok(ReindexReport {
            requested: documents.len(),
            succeeded,
            failed,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::embedding::HashEmbedder;
    use crate::types::document::NewDocument;
    use crate::vector::LocalVectorIndex;
    use std::time::Duration;

    struct Fixture {
        db: Arc<MetadataDb>,
        vector: Arc<LocalVectorIndex>,
        retrieval: Arc<RetrievalService>,
        reconcile: ReconcileService,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(MetadataDb::in_memory().unwrap());
        let vector = Arc::new(LocalVectorIndex::in_memory());
        vector.ensure_collection(64).await.unwrap();
        let providers = Arc::new(ProviderRegistry::with_embedder(Arc::new(
            HashEmbedder::new(64),
        )));
        let retrieval = Arc::new(RetrievalService::new(
            db.clone(),
            vector.clone(),
            providers.clone(),
            Duration::from_secs(5),
        ));
        let reconcile =
            ReconcileService::new(db.clone(), vector.clone(), providers, retrieval.clone());
        Fixture {
            db,
            vector,
            retrieval,
            reconcile,
        }
    }

    fn seed(db: &MetadataDb, owner_id: i64, chunks: &[&str]) -> i64 {
        let doc = db
            .insert_document(&NewDocument {
                owner_id,
                filename: "doc.md".to_string(),
                content_type: "text/markdown".to_string(),
                sha256: "h".to_string(),
                size_bytes: 1,
                blob_key: "k".to_string(),
            })
            .unwrap();
        let texts: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        db.replace_chunks(doc.id, &texts).unwrap();
        doc.id
    }

    #[tokio::test]
    async fn rebuild_matches_fresh_index_state() {
        let f = fixture().await;
        let doc_id = seed(&f.db, 1, &["chunk a", "chunk b", "chunk c"]);
        f.retrieval.index_document(doc_id).await.unwrap();

        // Drift: a chunk is excluded after indexing, vectors untouched.
        f.db.update_chunk(doc_id, 1, None, Some(false)).unwrap();
        assert_eq!(f.vector.partition_size(1).await.unwrap(), 3);

        let count = f
            .reconcile
            .rebuild_vectors(&Tenant::admin(9), doc_id)
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(f.vector.partition_size(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let f = fixture().await;
        let doc_id = seed(&f.db, 1, &["only chunk"]);
        f.retrieval.index_document(doc_id).await.unwrap();

        let first = f
            .reconcile
            .rebuild_vectors(&Tenant::user(1), doc_id)
            .await
            .unwrap();
        let second = f
            .reconcile
            .rebuild_vectors(&Tenant::user(1), doc_id)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(f.vector.partition_size(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rebuild_enforces_ownership() {
        let f = fixture().await;
        let doc_id = seed(&f.db, 1, &["x"]);
        let err = f
            .reconcile
            .rebuild_vectors(&Tenant::user(2), doc_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn targeted_reembed_updates_named_chunks() {
        let f = fixture().await;
        let doc_id = seed(&f.db, 1, &["aaa", "bbb", "ccc"]);
        f.retrieval.index_document(doc_id).await.unwrap();
        f.db.set_indexed(doc_id).unwrap();

        f.db.update_chunk(doc_id, 0, Some("aaa edited"), None).unwrap();
        let count = f
            .reconcile
            .reembed_chunks(&Tenant::user(1), doc_id, &[0])
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(f.vector.partition_size(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn bulk_reindex_reports_outcomes() {
        let f = fixture().await;
        let a = seed(&f.db, 1, &["doc one text"]);
        let b = seed(&f.db, 2, &["doc two text"]);
        f.retrieval.index_document(a).await.unwrap();
        f.retrieval.index_document(b).await.unwrap();

        let report = f
            .reconcile
            .reindex(&Tenant::admin(9), &ReindexFilter::default())
            .await
            .unwrap();
        assert_eq!(report.requested, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert!(report.results.iter().all(|r| r.ok));

        // Owner-scoped reindex narrows the selection.
        let scoped = f
            .reconcile
            .reindex(
                &Tenant::admin(9),
                &ReindexFilter {
                    owner_id: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(scoped.requested, 1);
        assert_eq!(scoped.results[0].document_id, a);

        // Non-admin callers are refused.
        assert!(matches!(
            f.reconcile
                .reindex(&Tenant::user(1), &ReindexFilter::default())
                .await
                .unwrap_err(),
            Error::Forbidden(_)
        ));
    }
}
