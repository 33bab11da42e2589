//! Document lifecycle service
//!
//! Owns the workflow state machine (upload, confirm, review, index, reject,
//! resubmit, delete), chunk CRUD with dense renumbering, and the cascade
//! delete across the metadata DB, the object store, and the vector index.
//! Every operation takes the acting tenant and enforces ownership;
//! administrators may act on any tenant's data.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::providers::ProviderRegistry;
use crate::retrieval::RetrievalService;
use crate::split::{self, SplitConfig};
use crate::storage::database::DocumentFilter;
use crate::storage::{document_key, markdown_key, MetadataDb, ObjectStore};
use crate::types::chunk::Chunk;
use crate::types::document::{
    ConversionStatus, Document, DocumentStatus, NewDocument, ReviewAction, ReviewVerdict,
};
use crate::types::settings::TenantSettings;
use crate::types::tenant::Tenant;
use crate::vector::{VectorIndex, VectorRecord};

const ENQUEUE_WAIT: Duration = Duration::from_secs(30);
const PREVIEW_MAX_CHARS: usize = 2000;

/// Result of a batch delete
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchDeleteOutcome {
    pub deleted: Vec<i64>,
    pub failed: Vec<i64>,
}

pub struct DocumentService {
    db: Arc<MetadataDb>,
    store: Arc<dyn ObjectStore>,
    vector: Arc<dyn VectorIndex>,
    providers: Arc<ProviderRegistry>,
    retrieval: Arc<RetrievalService>,
    split_cfg: SplitConfig,
    preview_chunks: usize,
    max_upload_size: usize,
    queue_capacity: usize,
}

impl DocumentService {
    pub fn new(
        db: Arc<MetadataDb>,
        store: Arc<dyn ObjectStore>,
        vector: Arc<dyn VectorIndex>,
        providers: Arc<ProviderRegistry>,
        retrieval: Arc<RetrievalService>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            store,
            vector,
            providers,
            retrieval,
            split_cfg: config.chunking.split_config(),
            preview_chunks: config.chunking.preview_chunks,
            max_upload_size: config.server.max_upload_size,
            queue_capacity: config.conversion.queue_capacity,
        }
    }

    fn require_owned(&self, actor: &Tenant, id: i64) -> Result<Document> {
        let document = self.db.require_document(id)?;
        if !actor.can_access(document.owner_id) {
            return Err(Error::forbidden("document belongs to another tenant"));
        }
        Ok(document)
    }

    fn require_admin(actor: &Tenant) -> Result<()> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(Error::forbidden("reviewer role required"))
        }
    }

    // ==================== upload and conversion ====================

    /// Persist metadata, store the blob, enqueue conversion.
    pub async fn upload(
        &self,
        actor: &Tenant,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<Document> {
        if bytes.is_empty() {
            return Err(Error::validation("empty file"));
        }
        if bytes.len() > self.max_upload_size {
            return Err(Error::validation(format!(
                "file exceeds upload limit of {} bytes",
                self.max_upload_size
            )));
        }
        if crate::types::document::FileKind::detect(filename, content_type).is_none() {
            return Err(Error::validation(format!(
                "unsupported file type: {filename} ({content_type})"
            )));
        }

        let sha256 = format!("{:x}", Sha256::digest(bytes));
        let blob_key = document_key(actor.id, &Uuid::new_v4(), filename);
        self.store.put(&blob_key, bytes, content_type).await?;

        let document = self.db.insert_document(&NewDocument {
            owner_id: actor.id,
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            sha256,
            size_bytes: bytes.len() as i64,
            blob_key,
        })?;

        tracing::info!(
            document_id = document.id,
            owner_id = actor.id,
            filename = %document.filename,
            size = bytes.len(),
            "document uploaded"
        );

        self.enqueue_with_backpressure(document.id).await?;
        self.db.require_document(document.id)
    }

    /// Enqueue a conversion job, waiting briefly when the queue is full.
    /// Giving up marks the conversion failed so the document is not stranded
    /// in `pending` with no job behind it.
    async fn enqueue_with_backpressure(&self, document_id: i64) -> Result<()> {
        let deadline = tokio::time::Instant::now() + ENQUEUE_WAIT;
        loop {
            match self.db.enqueue_conversion(document_id, self.queue_capacity) {
                Ok(_) => return Ok(()),
                Err(Error::ProviderBusy(_)) if tokio::time::Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                Err(e) => {
                    tracing::error!(document_id, "cannot enqueue conversion: {e}");
                    self.db
                        .finish_conversion_failed(document_id, "conversion queue unavailable")?;
                    return Err(e);
                }
            }
        }
    }

    /// Re-enqueue conversion; only failed or never-started conversions
    /// qualify.
    pub async fn retry_conversion(&self, actor: &Tenant, id: i64) -> Result<Document> {
        let document = self.require_owned(actor, id)?;
        if !matches!(
            document.conversion_status,
            ConversionStatus::Failed | ConversionStatus::Pending
        ) {
            return Err(Error::precondition(format!(
                "conversion is {}, retry applies to pending or failed",
                document.conversion_status.as_str()
            )));
        }
        self.db.reset_conversion_pending(id)?;
        self.enqueue_with_backpressure(id).await?;
        self.db.require_document(id)
    }

    // ==================== reads ====================

    pub fn get_document(&self, actor: &Tenant, id: i64) -> Result<Document> {
        self.require_owned(actor, id)
    }

    /// Non-admin callers are pinned to their own documents; rejected
    /// documents stay hidden unless asked for by status.
    pub fn list(
        &self,
        actor: &Tenant,
        owner_filter: Option<i64>,
        status_filter: Option<DocumentStatus>,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Document>, usize)> {
        let owner_id = if actor.is_admin() {
            owner_filter
        } else {
            if owner_filter.is_some() && owner_filter != Some(actor.id) {
                return Err(Error::forbidden("owner filter requires admin role"));
            }
            Some(actor.id)
        };
        self.db.list_documents(&DocumentFilter {
            owner_id,
            status: status_filter,
            hide_rejected: !actor.is_admin() && status_filter.is_none(),
            page,
            page_size,
        })
    }

    /// The reviewer queue: confirmed documents with conversion ready.
    pub fn list_pending_reviews(&self, actor: &Tenant) -> Result<Vec<(Document, usize)>> {
        Self::require_admin(actor)?;
        self.db.pending_reviews()
    }

    pub fn review_history(&self, actor: &Tenant, id: i64) -> Result<Vec<ReviewAction>> {
        self.require_owned(actor, id)?;
        self.db.list_review_actions(id)
    }

    // ==================== markdown ====================

    pub async fn download_markdown(&self, actor: &Tenant, id: i64) -> Result<Vec<u8>> {
        let document = self.require_owned(actor, id)?;
        if document.conversion_status != ConversionStatus::Ready {
            return Err(Error::precondition(format!(
                "markdown not ready (conversion is {})",
                document.conversion_status.as_str()
            )));
        }
        let key = document
            .markdown_key
            .ok_or_else(|| Error::not_found("markdown for document"))?;
        self.store.get(&key).await
    }

    /// Replace the Markdown with user-edited content. Permitted when the
    /// conversion is ready or failed; the splitter re-runs and the document
    /// moves to `confirmed` since the owner edited authoritative content.
    pub async fn replace_markdown(&self, actor: &Tenant, id: i64, bytes: &[u8]) -> Result<Document> {
        if bytes.is_empty() {
            return Err(Error::validation("empty markdown"));
        }
        let document = self.require_owned(actor, id)?;
        if !matches!(
            document.conversion_status,
            ConversionStatus::Ready | ConversionStatus::Failed
        ) {
            return Err(Error::precondition(
                "markdown can be replaced only after conversion finished",
            ));
        }

        let markdown = String::from_utf8_lossy(bytes).replace('\0', "");
        let key = document
            .markdown_key
            .unwrap_or_else(|| markdown_key(document.owner_id, id));
        self.store.put(&key, markdown.as_bytes(), "text/markdown").await?;

        let pieces = split::split(&markdown, &self.split_cfg);
        self.db.replace_chunks(id, &pieces)?;
        let preview = preview_text(&pieces, self.preview_chunks);
        self.db.set_markdown_replaced(id, &key, &preview)?;

        tracing::info!(document_id = id, chunks = pieces.len(), "markdown replaced by user");
        self.db.require_document(id)
    }

    // ==================== state machine ====================

    /// `uploaded -> confirmed`, only once conversion is ready.
    pub fn confirm(&self, actor: &Tenant, id: i64) -> Result<Document> {
        let document = self.require_owned(actor, id)?;
        if document.status != DocumentStatus::Uploaded {
            return Err(Error::precondition(format!(
                "confirm applies to uploaded documents, not {}",
                document.status.as_str()
            )));
        }
        if document.conversion_status != ConversionStatus::Ready {
            return Err(Error::precondition(
                "markdown not ready; wait for conversion or upload markdown first",
            ));
        }
        self.db.set_confirmed(id)?;
        self.db.require_document(id)
    }

    /// Approve and index. Approving from `uploaded` fast-tracks the document
    /// with its automatic chunks. On indexing failure the document stays
    /// `approved` for retry.
    pub async fn approve(&self, reviewer: &Tenant, id: i64) -> Result<Document> {
        Self::require_admin(reviewer)?;
        let document = self.db.require_document(id)?;
        if !matches!(
            document.status,
            DocumentStatus::Uploaded | DocumentStatus::Confirmed
        ) {
            return Err(Error::precondition(format!(
                "approve applies to uploaded or confirmed documents, not {}",
                document.status.as_str()
            )));
        }
        if document.conversion_status != ConversionStatus::Ready {
            return Err(Error::precondition("markdown not ready for approval"));
        }

        self.db.set_approved(id, reviewer.id)?;
        self.db
            .add_review_action(id, reviewer.id, ReviewVerdict::Approve, None)?;

        match self.retrieval.index_document(id).await {
            Ok(count) => {
                tracing::info!(document_id = id, vectors = count, "document approved and indexed");
                self.db.require_document(id)
            }
            Err(e) => {
                tracing::error!(document_id = id, "indexing failed after approval: {e}");
                Err(e)
            }
        }
    }

    pub fn reject(&self, reviewer: &Tenant, id: i64, reason: &str) -> Result<Document> {
        Self::require_admin(reviewer)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::validation("a reject reason is required"));
        }
        let document = self.db.require_document(id)?;
        if !matches!(
            document.status,
            DocumentStatus::Uploaded | DocumentStatus::Confirmed
        ) {
            return Err(Error::precondition(format!(
                "reject applies to uploaded or confirmed documents, not {}",
                document.status.as_str()
            )));
        }

        self.db.set_rejected(id, reviewer.id, reason)?;
        self.db
            .add_review_action(id, reviewer.id, ReviewVerdict::Reject, Some(reason))?;
        self.db.require_document(id)
    }

    /// `rejected -> confirmed`: the owner resubmits after reading the reason.
    pub fn resubmit(&self, actor: &Tenant, id: i64) -> Result<Document> {
        let document = self.require_owned(actor, id)?;
        if document.status != DocumentStatus::Rejected {
            return Err(Error::precondition("only rejected documents can be resubmitted"));
        }
        self.db.set_resubmitted(id)?;
        self.db.require_document(id)
    }

    /// Delete from any state. Downstream artifacts (vectors, blobs) are
    /// best-effort: a failure there is logged and the reconciliation service
    /// is the backstop, but the metadata row always goes.
    pub async fn delete(&self, actor: &Tenant, id: i64) -> Result<()> {
        let document = self.require_owned(actor, id)?;

        if let Err(e) = self
            .vector
            .delete_by_document(document.owner_id, document.id)
            .await
        {
            tracing::warn!(document_id = id, "vector cleanup failed during delete: {e}");
        }
        if let Err(e) = self.store.delete(&document.blob_key).await {
            tracing::warn!(document_id = id, "blob cleanup failed during delete: {e}");
        }
        if let Some(md_key) = &document.markdown_key {
            if let Err(e) = self.store.delete(md_key).await {
                tracing::warn!(document_id = id, "markdown cleanup failed during delete: {e}");
            }
        }

        self.db.delete_document(id)?;
        tracing::info!(document_id = id, "document deleted");
        Ok(())
    }

    pub async fn delete_many(&self, actor: &Tenant, ids: &[i64]) -> BatchDeleteOutcome {
        let mut outcome = BatchDeleteOutcome {
            deleted: Vec::new(),
            failed: Vec::new(),
        };
        for &id in ids {
            match self.delete(actor, id).await {
                Ok(()) => outcome.deleted.push(id),
                Err(e) => {
                    tracing::warn!(document_id = id, "batch delete entry failed: {e}");
                    outcome.failed.push(id);
                }
            }
        }
        outcome
    }

    // ==================== chunk CRUD ====================

    /// Chunk mutations wait for conversion: the single-writer-per-document
    /// rule is enforced through the state machine.
    fn require_not_converting(document: &Document) -> Result<()> {
        if document.conversion_status == ConversionStatus::Processing {
            return Err(Error::precondition(
                "document is being converted; retry after conversion finishes",
            ));
        }
        Ok(())
    }

    pub fn list_chunks(
        &self,
        actor: &Tenant,
        id: i64,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Chunk>, usize)> {
        self.require_owned(actor, id)?;
        self.db.list_chunks(id, page, page_size)
    }

    /// Append a chunk at the end. On an indexed document the vector is
    /// written immediately.
    pub async fn create_chunk(&self, actor: &Tenant, id: i64, content: &str) -> Result<Chunk> {
        let document = self.require_owned(actor, id)?;
        Self::require_not_converting(&document)?;

        let chunk = self.db.append_chunk(id, content)?;

        if document.status == DocumentStatus::Indexed {
            self.upsert_single_vector(&document, &chunk).await?;
        }
        Ok(chunk)
    }

    /// Update content and/or inclusion. Toggling `included` on an indexed
    /// document syncs the vector immediately; content edits re-embed only
    /// when `sync_vectors` is set, otherwise `rebuild_vectors` is the
    /// recovery.
    pub async fn update_chunk(
        &self,
        actor: &Tenant,
        id: i64,
        chunk_index: i64,
        content: Option<&str>,
        included: Option<bool>,
        sync_vectors: bool,
    ) -> Result<Chunk> {
        let document = self.require_owned(actor, id)?;
        Self::require_not_converting(&document)?;

        let before = self
            .db
            .get_chunk(id, chunk_index)?
            .ok_or_else(|| Error::not_found(format!("chunk {chunk_index} of document {id}")))?;
        let chunk = self.db.update_chunk(id, chunk_index, content, included)?;

        if document.status == DocumentStatus::Indexed {
            if before.included && !chunk.included {
                self.vector
                    .delete_chunk(document.owner_id, id, chunk_index)
                    .await?;
            } else if !before.included && chunk.included {
                self.upsert_single_vector(&document, &chunk).await?;
            } else if sync_vectors && chunk.included && content.is_some() {
                self.upsert_single_vector(&document, &chunk).await?;
            }
        }
        Ok(chunk)
    }

    /// Delete a chunk and renumber. Renumbering shifts every later chunk's
    /// index, so on an indexed document the whole vector set is rebuilt to
    /// keep references consistent.
    pub async fn delete_chunk(&self, actor: &Tenant, id: i64, chunk_index: i64) -> Result<()> {
        let document = self.require_owned(actor, id)?;
        Self::require_not_converting(&document)?;

        self.db.delete_chunk(id, chunk_index)?;

        if document.status == DocumentStatus::Indexed {
            self.retrieval.embed_and_store(&document).await?;
        }
        Ok(())
    }

    async fn upsert_single_vector(&self, document: &Document, chunk: &Chunk) -> Result<()> {
        self.vector.ensure_partition(document.owner_id).await?;
        let embeddings = self.providers.embed(&[chunk.content.clone()]).await?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider_bad_response("embedder returned no vector"))?;
        self.vector
            .upsert(
                document.owner_id,
                &[VectorRecord {
                    document_id: document.id,
                    chunk_index: chunk.chunk_index,
                    embedding,
                }],
            )
            .await
    }

    // ==================== tenant settings ====================

    pub fn get_settings(&self, actor: &Tenant, tenant_id: i64) -> Result<TenantSettings> {
        if !actor.can_access(tenant_id) {
            return Err(Error::forbidden("settings belong to another tenant"));
        }
        self.db.get_settings(tenant_id)
    }

    pub fn update_settings(
        &self,
        actor: &Tenant,
        tenant_id: i64,
        settings: &TenantSettings,
    ) -> Result<TenantSettings> {
        if !actor.can_access(tenant_id) {
            return Err(Error::forbidden("settings belong to another tenant"));
        }
        if settings.top_k < 1 || settings.top_k > 50 {
            return Err(Error::validation("top_k must be within 1..=50"));
        }
        if !(0.0..=2.0).contains(&settings.temperature) {
            return Err(Error::validation("temperature must be within 0..=2"));
        }
        self.db.upsert_settings(tenant_id, settings)?;
        self.db.get_settings(tenant_id)
    }
}

fn preview_text(chunks: &[String], preview_chunks: usize) -> String {
    let joined = chunks
        .iter()
        .take(preview_chunks.max(1))
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n");
    joined.chars().take(PREVIEW_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::embedding::HashEmbedder;
    use crate::providers::Embedder;
    use crate::storage::FsObjectStore;
    use crate::types::query::QueryOptions;
    use crate::worker::ConversionWorker;

    /// Everything wired together on the in-process backends: the staging
    /// ground for the end-to-end scenarios.
    struct Stack {
        _dir: tempfile::TempDir,
        db: Arc<MetadataDb>,
        vector: Arc<crate::vector::LocalVectorIndex>,
        documents: DocumentService,
        retrieval: Arc<RetrievalService>,
        worker: ConversionWorker,
    }

    async fn stack() -> Stack {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        // Paragraph-preserving chunks keep the fixtures predictable: each
        // paragraph over half the target stands alone.
        config.chunking.strategy = crate::split::SplitStrategy::SemanticParagraph;
        config.chunking.chunk_size = 64;
        config.chunking.overlap_percent = 0;

        let db = Arc::new(MetadataDb::in_memory().unwrap());
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(dir.path()));
        let vector = Arc::new(crate::vector::LocalVectorIndex::in_memory());
        let providers = Arc::new(ProviderRegistry::with_embedder(Arc::new(
            HashEmbedder::new(96),
        )));
        vector.ensure_collection(96).await.unwrap();

        let retrieval = Arc::new(RetrievalService::new(
            db.clone(),
            vector.clone(),
            providers.clone(),
            Duration::from_secs(5),
        ));
        let documents = DocumentService::new(
            db.clone(),
            store.clone(),
            vector.clone(),
            providers.clone(),
            retrieval.clone(),
            &config,
        );
        let worker = ConversionWorker::new(
            db.clone(),
            store,
            providers,
            config.chunking.split_config(),
            config.chunking.preview_chunks,
            config.conversion.clone(),
        );

        Stack {
            _dir: dir,
            db,
            vector,
            documents,
            retrieval,
            worker,
        }
    }

    /// Drain the conversion queue inline, standing in for the worker binary.
    async fn drain_queue(stack: &Stack) {
        while let Some(job) = stack.db.claim_next_job().unwrap() {
            stack.worker.process_job(job).await;
        }
    }

    #[tokio::test]
    async fn happy_path_markdown_upload_to_query() {
        let s = stack().await;
        let owner = Tenant::user(7);
        let admin = Tenant::admin(1);

        let doc = s
            .documents
            .upload(&owner, "hello.md", "text/markdown", b"# Hello\n\nWorld.")
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        drain_queue(&s).await;

        let doc = s.documents.get_document(&owner, doc.id).unwrap();
        assert_eq!(doc.conversion_status, ConversionStatus::Ready);
        let (chunks, total) = s.documents.list_chunks(&owner, doc.id, 1, 50).unwrap();
        assert_eq!(total, 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks[0].content.starts_with("# Hello"));

        s.documents.confirm(&owner, doc.id).unwrap();
        let doc = s.documents.approve(&admin, doc.id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert!(doc.indexed_at.is_some());

        let answer = s
            .retrieval
            .query(&owner, "Hello", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].document_id, doc.id);
        assert_eq!(answer.sources[0].chunk_index, 0);
        assert!(answer.sources[0].relevance >= 0.5);

        // Another tenant sees nothing.
        let other = s
            .retrieval
            .query(&Tenant::user(8), "Hello", &QueryOptions::default())
            .await
            .unwrap();
        assert!(other.sources.is_empty());
    }

    #[tokio::test]
    async fn confirm_requires_ready_conversion() {
        let s = stack().await;
        let owner = Tenant::user(1);
        let doc = s
            .documents
            .upload(&owner, "a.md", "text/markdown", b"content")
            .await
            .unwrap();

        // Conversion has not run yet.
        let err = s.documents.confirm(&owner, doc.id).unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[tokio::test]
    async fn conversion_failure_then_user_markdown_override() {
        let s = stack().await;
        let owner = Tenant::user(2);
        let admin = Tenant::admin(1);

        let doc = s
            .documents
            .upload(&owner, "broken.pdf", "application/pdf", b"not a real pdf")
            .await
            .unwrap();
        drain_queue(&s).await;

        let doc = s.documents.get_document(&owner, doc.id).unwrap();
        assert_eq!(doc.conversion_status, ConversionStatus::Failed);
        assert!(doc.conversion_error.as_deref().is_some_and(|e| !e.is_empty()));

        // The owner uploads hand-edited Markdown as recovery.
        let doc = s
            .documents
            .replace_markdown(&owner, doc.id, b"# Fixed\n\nHand-written content.")
            .await
            .unwrap();
        assert_eq!(doc.conversion_status, ConversionStatus::Ready);
        assert_eq!(doc.status, DocumentStatus::Confirmed);
        assert!(s.db.count_chunks(doc.id).unwrap() > 0);

        let doc = s.documents.approve(&admin, doc.id).await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Indexed);
    }

    #[tokio::test]
    async fn reject_resubmit_cycle() {
        let s = stack().await;
        let owner = Tenant::user(3);
        let admin = Tenant::admin(1);

        let doc = s
            .documents
            .upload(&owner, "a.md", "text/markdown", b"some content")
            .await
            .unwrap();
        drain_queue(&s).await;
        s.documents.confirm(&owner, doc.id).unwrap();

        // Empty reason is invalid.
        assert!(matches!(
            s.documents.reject(&admin, doc.id, "  ").unwrap_err(),
            Error::Validation(_)
        ));

        let doc = s.documents.reject(&admin, doc.id, "needs work").unwrap();
        assert_eq!(doc.status, DocumentStatus::Rejected);
        assert_eq!(doc.reject_reason.as_deref(), Some("needs work"));

        let doc = s.documents.resubmit(&owner, doc.id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Confirmed);

        let history = s.documents.review_history(&owner, doc.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, ReviewVerdict::Reject);
    }

    #[tokio::test]
    async fn partial_inclusion_indexes_only_included_chunks() {
        let s = stack().await;
        let owner = Tenant::user(4);
        let admin = Tenant::admin(1);

        // Ten well-separated paragraphs produce ten chunks at size 64.
        let body: String = (0..10)
            .map(|i| format!("Paragraph number {i} with some padding text to fill the chunk."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let doc = s
            .documents
            .upload(&owner, "ten.md", "text/markdown", body.as_bytes())
            .await
            .unwrap();
        drain_queue(&s).await;
        assert_eq!(s.db.count_chunks(doc.id).unwrap(), 10);

        for idx in [3, 7] {
            s.documents
                .update_chunk(&owner, doc.id, idx, None, Some(false), false)
                .await
                .unwrap();
        }

        s.documents.confirm(&owner, doc.id).unwrap();
        s.documents.approve(&admin, doc.id).await.unwrap();

        assert_eq!(s.vector.partition_size(4).await.unwrap(), 8);
        let hits = s
            .vector
            .search(&[4], &s.query_vector("Paragraph").await, 20)
            .await
            .unwrap();
        let indices: std::collections::HashSet<i64> =
            hits.iter().map(|h| h.chunk_index).collect();
        assert!(!indices.contains(&3) && !indices.contains(&7));
    }

    impl Stack {
        async fn query_vector(&self, text: &str) -> Vec<f32> {
            HashEmbedder::new(96)
                .embed(&[text.to_string()])
                .await
                .unwrap()
                .remove(0)
        }
    }

    #[tokio::test]
    async fn chunk_edit_without_sync_then_rebuild_restores_drift() {
        let s = stack().await;
        let owner = Tenant::user(5);
        let admin = Tenant::admin(1);

        let body: String = ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .map(|name| format!("Facts about {name} stretched out to paragraph length."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let doc = s
            .documents
            .upload(&owner, "drift.md", "text/markdown", body.as_bytes())
            .await
            .unwrap();
        drain_queue(&s).await;
        s.documents.confirm(&owner, doc.id).unwrap();
        s.documents.approve(&admin, doc.id).await.unwrap();
        assert_eq!(s.vector.partition_size(5).await.unwrap(), 5);

        // Edit chunk 2 without vector sync: the index still serves old text.
        s.documents
            .update_chunk(&owner, doc.id, 2, Some("zeta facts entirely rewritten"), None, false)
            .await
            .unwrap();

        // Rebuild restores Invariant 4: same count, fresh embeddings.
        let rebuilt = s
            .retrieval
            .embed_and_store(&s.db.require_document(doc.id).unwrap())
            .await
            .unwrap();
        assert_eq!(rebuilt, 5);
        assert_eq!(s.vector.partition_size(5).await.unwrap(), 5);

        let answer = s
            .retrieval
            .query(&owner, "zeta facts entirely rewritten", &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(answer.sources[0].chunk_index, 2);
    }

    #[tokio::test]
    async fn included_toggle_syncs_indexed_document() {
        let s = stack().await;
        let owner = Tenant::user(6);
        let admin = Tenant::admin(1);

        let doc = s
            .documents
            .upload(
                &owner,
                "t.md",
                "text/markdown",
                b"The first topic paragraph padded to stand alone.\n\n\
                  The second topic paragraph padded to stand alone.",
            )
            .await
            .unwrap();
        drain_queue(&s).await;
        s.documents.confirm(&owner, doc.id).unwrap();
        s.documents.approve(&admin, doc.id).await.unwrap();
        assert_eq!(s.vector.partition_size(6).await.unwrap(), 2);

        s.documents
            .update_chunk(&owner, doc.id, 1, None, Some(false), false)
            .await
            .unwrap();
        assert_eq!(s.vector.partition_size(6).await.unwrap(), 1);

        s.documents
            .update_chunk(&owner, doc.id, 1, None, Some(true), false)
            .await
            .unwrap();
        assert_eq!(s.vector.partition_size(6).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_chunk_on_indexed_document_rebuilds_vectors() {
        let s = stack().await;
        let owner = Tenant::user(9);
        let admin = Tenant::admin(1);

        let doc = s
            .documents
            .upload(
                &owner,
                "d.md",
                "text/markdown",
                b"First paragraph padded out to stand by itself.\n\n\
                  Second paragraph padded out to stand by itself.\n\n\
                  Third paragraph padded out to stand by itself.",
            )
            .await
            .unwrap();
        drain_queue(&s).await;
        s.documents.confirm(&owner, doc.id).unwrap();
        s.documents.approve(&admin, doc.id).await.unwrap();
        assert_eq!(s.vector.partition_size(9).await.unwrap(), 3);

        s.documents.delete_chunk(&owner, doc.id, 1).await.unwrap();

        // Indices renumbered densely and the partition matches them.
        let chunks = s.db.all_chunks(doc.id).unwrap();
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(s.vector.partition_size(9).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_cascades_everywhere() {
        let s = stack().await;
        let owner = Tenant::user(11);
        let admin = Tenant::admin(1);

        let doc = s
            .documents
            .upload(&owner, "gone.md", "text/markdown", b"content to vanish")
            .await
            .unwrap();
        drain_queue(&s).await;
        s.documents.confirm(&owner, doc.id).unwrap();
        s.documents.approve(&admin, doc.id).await.unwrap();

        let blob_key = s.db.require_document(doc.id).unwrap().blob_key;
        s.documents.delete(&owner, doc.id).await.unwrap();

        assert!(s.db.get_document(doc.id).unwrap().is_none());
        assert_eq!(s.db.count_chunks(doc.id).unwrap(), 0);
        assert_eq!(s.vector.partition_size(11).await.unwrap(), 0);
        assert!(s.documents.store.get(&blob_key).await.is_err());
    }

    #[tokio::test]
    async fn ownership_is_enforced() {
        let s = stack().await;
        let owner = Tenant::user(12);
        let intruder = Tenant::user(13);

        let doc = s
            .documents
            .upload(&owner, "private.md", "text/markdown", b"mine")
            .await
            .unwrap();

        assert!(matches!(
            s.documents.get_document(&intruder, doc.id).unwrap_err(),
            Error::Forbidden(_)
        ));
        assert!(matches!(
            s.documents.delete(&intruder, doc.id).await.unwrap_err(),
            Error::Forbidden(_)
        ));
        // Approve requires the admin role regardless of ownership.
        assert!(matches!(
            s.documents.approve(&owner, doc.id).await.unwrap_err(),
            Error::Forbidden(_)
        ));
        // Admins may read anything.
        assert!(s.documents.get_document(&Tenant::admin(1), doc.id).is_ok());
    }

    #[tokio::test]
    async fn upload_validations() {
        let s = stack().await;
        let owner = Tenant::user(14);

        assert!(matches!(
            s.documents
                .upload(&owner, "x.md", "text/markdown", b"")
                .await
                .unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(
            s.documents
                .upload(&owner, "x.exe", "application/octet-stream", b"MZ")
                .await
                .unwrap_err(),
            Error::Validation(_)
        ));
    }

    #[tokio::test]
    async fn same_bytes_reupload_reproduces_document() {
        let s = stack().await;
        let owner = Tenant::user(15);
        let bytes = b"deterministic content\n\nsecond paragraph";

        let first = s
            .documents
            .upload(&owner, "same.md", "text/markdown", bytes)
            .await
            .unwrap();
        drain_queue(&s).await;
        let first_sha = first.sha256.clone();
        let first_chunks = s.db.count_chunks(first.id).unwrap();
        s.documents.delete(&owner, first.id).await.unwrap();

        let second = s
            .documents
            .upload(&owner, "same.md", "text/markdown", bytes)
            .await
            .unwrap();
        drain_queue(&s).await;
        assert_eq!(second.sha256, first_sha);
        assert_eq!(s.db.count_chunks(second.id).unwrap(), first_chunks);
    }

    #[tokio::test]
    async fn pending_review_listing_shows_confirmed_ready() {
        let s = stack().await;
        let owner = Tenant::user(16);
        let admin = Tenant::admin(1);

        let doc = s
            .documents
            .upload(&owner, "r.md", "text/markdown", b"review me")
            .await
            .unwrap();
        drain_queue(&s).await;
        assert!(s.documents.list_pending_reviews(&admin).unwrap().is_empty());

        s.documents.confirm(&owner, doc.id).unwrap();
        let pending = s.documents.list_pending_reviews(&admin).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.id, doc.id);
        assert_eq!(pending[0].1, 1);

        assert!(matches!(
            s.documents.list_pending_reviews(&owner).unwrap_err(),
            Error::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn settings_update_validates_bounds() {
        let s = stack().await;
        let owner = Tenant::user(17);
        let mut settings = s.documents.get_settings(&owner, 17).unwrap();
        settings.top_k = 0;
        assert!(matches!(
            s.documents.update_settings(&owner, 17, &settings).unwrap_err(),
            Error::Validation(_)
        ));
        settings.top_k = 10;
        settings.temperature = 1.5;
        let saved = s.documents.update_settings(&owner, 17, &settings).unwrap();
        assert_eq!(saved.top_k, 10);
        assert!(matches!(
            s.documents.get_settings(&Tenant::user(18), 17).unwrap_err(),
            Error::Forbidden(_)
        ));
    }
}
