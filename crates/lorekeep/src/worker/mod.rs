//! Conversion worker pool
//!
//! Pulls jobs from the durable queue, converts the upload to Markdown,
//! replaces the document's chunks, and flips `conversion_status` to `ready`.
//! Jobs for distinct documents run in parallel; the same document never runs
//! twice concurrently because the first act of a job is the exclusive
//! `pending|failed -> processing` flip in the metadata DB.
//!
//! Delivery is at-least-once, so every step is idempotent: preconditions are
//! re-checked, chunking is deterministic, and chunk replacement is
//! transactional.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConversionConfig;
use crate::convert;
use crate::error::{Error, Result};
use crate::providers::ProviderRegistry;
use crate::split::{self, SplitConfig};
use crate::storage::{markdown_key, ConversionJob, MetadataDb, ObjectStore};
use crate::types::document::{ConversionStatus, DocumentStatus, FileKind};

const PREVIEW_MAX_CHARS: usize = 2000;

/// Why a claimed job did no work
#[derive(Debug, PartialEq, Eq)]
pub enum ConvertOutcome {
    Done,
    Skipped(&'static str),
}

pub struct ConversionWorker {
    db: Arc<MetadataDb>,
    store: Arc<dyn ObjectStore>,
    providers: Arc<ProviderRegistry>,
    split_cfg: SplitConfig,
    preview_chunks: usize,
    cfg: ConversionConfig,
}

impl ConversionWorker {
    pub fn new(
        db: Arc<MetadataDb>,
        store: Arc<dyn ObjectStore>,
        providers: Arc<ProviderRegistry>,
        split_cfg: SplitConfig,
        preview_chunks: usize,
        cfg: ConversionConfig,
    ) -> Self {
        Self {
            db,
            store,
            providers,
            split_cfg,
            preview_chunks,
            cfg,
        }
    }

    /// Run the worker pool until the task is cancelled.
    pub async fn run(self: Arc<Self>) {
        let workers = self.cfg.effective_workers();
        tracing::info!(workers, "conversion worker pool starting");

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let this = self.clone();
            handles.push(tokio::spawn(async move {
                this.work_loop(worker_id).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn work_loop(&self, worker_id: usize) {
        let poll_interval = Duration::from_millis(self.cfg.poll_interval_ms);
        loop {
            if let Err(e) = self.db.requeue_stale_jobs(self.cfg.job_timeout_secs) {
                tracing::warn!(worker_id, "stale-job sweep failed: {e}");
            }

            match self.db.claim_next_job() {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => {
                    tracing::warn!(worker_id, "job claim failed: {e}");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    /// Run one job under the hard time limit and record the outcome.
    pub async fn process_job(&self, job: ConversionJob) {
        let timeout = Duration::from_secs(self.cfg.job_timeout_secs);
        let started = std::time::Instant::now();

        let outcome =
            tokio::time::timeout(timeout, self.convert_document(job.document_id, job.attempts))
                .await;

        match outcome {
            Ok(Ok(ConvertOutcome::Done)) => {
                tracing::info!(
                    job_id = job.id,
                    document_id = job.document_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "conversion complete"
                );
                if let Err(e) = self.db.complete_job(job.id) {
                    tracing::warn!(job_id = job.id, "cannot mark job done: {e}");
                }
            }
            Ok(Ok(ConvertOutcome::Skipped(reason))) => {
                tracing::info!(job_id = job.id, document_id = job.document_id, reason, "job skipped");
                if let Err(e) = self.db.complete_job(job.id) {
                    tracing::warn!(job_id = job.id, "cannot mark job done: {e}");
                }
            }
            Ok(Err(e)) => {
                self.record_failure(&job, &e.to_string(), e.is_transient());
            }
            Err(_) => {
                let message = format!(
                    "conversion timed out after {}s",
                    self.cfg.job_timeout_secs
                );
                tracing::error!(job_id = job.id, document_id = job.document_id, "{message}");
                self.record_failure(&job, &message, false);
            }
        }
    }

    fn record_failure(&self, job: &ConversionJob, message: &str, transient: bool) {
        tracing::error!(
            job_id = job.id,
            document_id = job.document_id,
            attempt = job.attempts,
            transient,
            "conversion failed: {message}"
        );

        let retried = self
            .db
            .fail_job(
                job.id,
                job.attempts,
                message,
                transient,
                self.cfg.max_retries,
                self.cfg.retry_backoff_secs,
            )
            .unwrap_or(false);

        let result = if retried {
            // Reopen the claim so the redelivered job can begin again.
            self.db.reset_conversion_pending(job.document_id)
        } else {
            self.db.finish_conversion_failed(job.document_id, message)
        };
        if let Err(e) = result {
            tracing::warn!(document_id = job.document_id, "cannot record conversion state: {e}");
        }
    }

    /// The conversion pipeline for one document.
    pub async fn convert_document(&self, document_id: i64, attempt: u32) -> Result<ConvertOutcome> {
        let Some(document) = self.db.get_document(document_id)? else {
            return Ok(ConvertOutcome::Skipped("document deleted"));
        };

        if !matches!(
            document.status,
            DocumentStatus::Uploaded | DocumentStatus::Confirmed | DocumentStatus::Approved
        ) {
            return Ok(ConvertOutcome::Skipped("document left the conversion workflow"));
        }

        if !self.db.try_begin_conversion(document_id)? {
            // A redelivered job may find its own stale `processing` claim;
            // anything else means another worker owns the document.
            let current = self.db.require_document(document_id)?;
            let stale_redelivery =
                current.conversion_status == ConversionStatus::Processing && attempt > 1;
            if !stale_redelivery {
                return Ok(ConvertOutcome::Skipped("conversion already claimed"));
            }
            tracing::warn!(document_id, attempt, "resuming stale conversion claim");
        }

        let kind = FileKind::detect(&document.filename, &document.content_type)
            .ok_or_else(|| {
                Error::conversion(format!(
                    "unsupported file type: {} ({})",
                    document.filename, document.content_type
                ))
            })?;

        let bytes = self.store.get(&document.blob_key).await?;

        tracing::info!(
            document_id,
            filename = %document.filename,
            kind = ?kind,
            size = bytes.len(),
            "converting to markdown"
        );
        let markdown = convert::to_markdown(kind, &bytes, &self.providers).await?;

        let md_key = markdown_key(document.owner_id, document.id);
        self.store
            .put(&md_key, markdown.as_bytes(), "text/markdown")
            .await?;

        let pieces = split::split(&markdown, &self.split_cfg);
        let chunk_count = self.db.replace_chunks(document_id, &pieces)?;

        let preview = build_preview(&pieces, self.preview_chunks);
        self.db
            .finish_conversion_ready(document_id, &md_key, &preview)?;

        tracing::info!(document_id, chunk_count, "markdown ready");
        Ok(ConvertOutcome::Done)
    }
}

/// Preview text shown in listings: the first few chunks, truncated.
fn build_preview(chunks: &[String], preview_chunks: usize) -> String {
    let joined = chunks
        .iter()
        .take(preview_chunks.max(1))
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n");
    if joined.chars().count() > PREVIEW_MAX_CHARS {
        joined.chars().take(PREVIEW_MAX_CHARS).collect()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::embedding::HashEmbedder;
    use crate::storage::{document_key, FsObjectStore};
    use crate::types::document::NewDocument;
    use uuid::Uuid;

    fn worker(store_root: &std::path::Path) -> ConversionWorker {
        ConversionWorker::new(
            Arc::new(MetadataDb::in_memory().unwrap()),
            Arc::new(FsObjectStore::new(store_root)),
            Arc::new(ProviderRegistry::with_embedder(Arc::new(HashEmbedder::new(32)))),
            SplitConfig {
                chunk_size: 64,
                overlap_percent: 0,
                ..SplitConfig::default()
            },
            3,
            ConversionConfig::default(),
        )
    }

    async fn upload(worker: &ConversionWorker, owner_id: i64, filename: &str, content_type: &str, bytes: &[u8]) -> i64 {
        let key = document_key(owner_id, &Uuid::new_v4(), filename);
        worker.store.put(&key, bytes, content_type).await.unwrap();
        let doc = worker
            .db
            .insert_document(&NewDocument {
                owner_id,
                filename: filename.to_string(),
                content_type: content_type.to_string(),
                sha256: "h".to_string(),
                size_bytes: bytes.len() as i64,
                blob_key: key,
            })
            .unwrap();
        doc.id
    }

    #[tokio::test]
    async fn markdown_upload_converts_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let doc_id = upload(&worker, 7, "hello.md", "text/markdown", b"# Hello\n\nWorld.").await;

        let outcome = worker.convert_document(doc_id, 1).await.unwrap();
        assert_eq!(outcome, ConvertOutcome::Done);

        let doc = worker.db.require_document(doc_id).unwrap();
        assert_eq!(doc.conversion_status, ConversionStatus::Ready);
        assert_eq!(
            doc.markdown_key.as_deref(),
            Some("tenant_7/markdown/1.md")
        );
        assert!(doc.preview_text.unwrap().starts_with("# Hello"));

        let chunks = worker.db.all_chunks(doc_id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks[0].content.starts_with("# Hello"));

        // Markdown landed in the object store under the path convention.
        let stored = worker.store.get("tenant_7/markdown/1.md").await.unwrap();
        assert_eq!(stored, b"# Hello\n\nWorld.");
    }

    #[tokio::test]
    async fn csv_converts_to_table_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let doc_id = upload(&worker, 1, "data.csv", "text/csv", b"a,b\n1,2\n").await;

        worker.convert_document(doc_id, 1).await.unwrap();
        let chunks = worker.db.all_chunks(doc_id).unwrap();
        assert!(chunks[0].content.contains("| a | b |"));
        assert!(chunks[0].content.contains("|---|---|"));
    }

    #[tokio::test]
    async fn unsupported_type_is_terminal_failure() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let doc_id = upload(&worker, 1, "blob.bin", "application/zip", b"\x00\x01").await;

        let err = worker.convert_document(doc_id, 1).await.unwrap_err();
        assert!(matches!(err, Error::ConversionFailed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn corrupt_pdf_fails_with_error_recorded_via_process_job() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let doc_id = upload(&worker, 1, "bad.pdf", "application/pdf", b"not a pdf").await;

        worker.db.enqueue_conversion(doc_id, 10).unwrap();
        let job = worker.db.claim_next_job().unwrap().unwrap();
        worker.process_job(job).await;

        let doc = worker.db.require_document(doc_id).unwrap();
        assert_eq!(doc.conversion_status, ConversionStatus::Failed);
        assert!(doc.conversion_error.is_some());
        // Converter failures are not retried.
        assert!(worker.db.claim_next_job().unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_blob_is_transient_and_requeues() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let doc = worker
            .db
            .insert_document(&NewDocument {
                owner_id: 1,
                filename: "ghost.md".to_string(),
                content_type: "text/markdown".to_string(),
                sha256: "h".to_string(),
                size_bytes: 1,
                blob_key: "tenant_1/documents/nope/ghost.md".to_string(),
            })
            .unwrap();

        worker.db.enqueue_conversion(doc.id, 10).unwrap();
        let job = worker.db.claim_next_job().unwrap().unwrap();
        worker.process_job(job).await;

        // Transient failure: the document is back to pending, awaiting the
        // backed-off redelivery.
        let refreshed = worker.db.require_document(doc.id).unwrap();
        assert_eq!(refreshed.conversion_status, ConversionStatus::Pending);
        assert_eq!(worker.db.queue_depth().unwrap(), 1);
    }

    #[tokio::test]
    async fn second_claim_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let doc_id = upload(&worker, 1, "a.md", "text/markdown", b"content").await;

        worker.db.try_begin_conversion(doc_id).unwrap();
        let outcome = worker.convert_document(doc_id, 1).await.unwrap();
        assert_eq!(outcome, ConvertOutcome::Skipped("conversion already claimed"));
    }

    #[tokio::test]
    async fn reconversion_replaces_chunks_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        let worker = worker(dir.path());
        let doc_id = upload(&worker, 1, "a.md", "text/markdown", b"stable content here").await;

        worker.convert_document(doc_id, 1).await.unwrap();
        let first = worker.db.all_chunks(doc_id).unwrap();

        worker.db.reset_conversion_pending(doc_id).unwrap();
        worker.convert_document(doc_id, 2).await.unwrap();
        let second = worker.db.all_chunks(doc_id).unwrap();

        let contents = |chunks: &[crate::types::chunk::Chunk]| {
            chunks.iter().map(|c| c.content.clone()).collect::<Vec<_>>()
        };
        assert_eq!(contents(&first), contents(&second));
    }

    #[test]
    fn preview_truncates() {
        let chunks = vec!["x".repeat(1500), "y".repeat(1500)];
        let preview = build_preview(&chunks, 3);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
    }
}
