//! Durable conversion queue
//!
//! Jobs live in the metadata DB so the server (producer) and the worker
//! binary (consumer) share them through the same file. Delivery is
//! at-least-once: a claimed job whose worker dies is re-delivered once its
//! claim goes stale. Job execution is idempotent, so redelivery is safe.

use chrono::{Duration as ChronoDuration, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::{Error, Result};

use super::database::MetadataDb;

/// A claimed conversion job
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: i64,
    pub document_id: i64,
    /// Delivery attempts including this one
    pub attempts: u32,
}

impl MetadataDb {
    /// Enqueue a conversion job for a document.
    ///
    /// Idempotent per document: an active (queued or processing) job is
    /// reused. Fails with `ProviderBusy` when the queue is at capacity; the
    /// caller may wait and retry.
    pub fn enqueue_conversion(&self, document_id: i64, capacity: usize) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connection().lock();

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM conversion_jobs \
                 WHERE document_id = ?1 AND status IN ('queued', 'processing') \
                 ORDER BY id DESC LIMIT 1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let depth: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversion_jobs WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )?;
        if depth as usize >= capacity {
            return Err(Error::ProviderBusy("conversion queue is full".to_string()));
        }

        conn.execute(
            "INSERT INTO conversion_jobs (document_id, status, attempts, available_at, created_at) \
             VALUES (?1, 'queued', 0, ?2, ?2)",
            params![document_id, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Claim the oldest ready job, flipping it to `processing`.
    pub fn claim_next_job(&self) -> Result<Option<ConversionJob>> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connection().lock();
        let job = conn
            .query_row(
                "UPDATE conversion_jobs \
                 SET status = 'processing', claimed_at = ?1, attempts = attempts + 1 \
                 WHERE id = ( \
                     SELECT id FROM conversion_jobs \
                     WHERE status = 'queued' AND available_at <= ?1 \
                     ORDER BY id ASC LIMIT 1 \
                 ) \
                 RETURNING id, document_id, attempts",
                params![now],
                |row| {
                    Ok(ConversionJob {
                        id: row.get(0)?,
                        document_id: row.get(1)?,
                        attempts: row.get::<_, i64>(2)? as u32,
                    })
                },
            )
            .optional()?;
        Ok(job)
    }

    /// Re-deliver processing jobs whose claim is older than the job time
    /// limit (worker crash or hang). Returns how many were requeued.
    pub fn requeue_stale_jobs(&self, job_timeout_secs: u64) -> Result<usize> {
        let cutoff = (Utc::now() - ChronoDuration::seconds(job_timeout_secs as i64)).to_rfc3339();
        let now = Utc::now().to_rfc3339();
        let conn = self.connection().lock();
        let changed = conn.execute(
            "UPDATE conversion_jobs \
             SET status = 'queued', claimed_at = NULL, available_at = ?2 \
             WHERE status = 'processing' AND claimed_at < ?1",
            params![cutoff, now],
        )?;
        Ok(changed)
    }

    pub fn complete_job(&self, job_id: i64) -> Result<()> {
        let conn = self.connection().lock();
        conn.execute(
            "UPDATE conversion_jobs SET status = 'done' WHERE id = ?1",
            params![job_id],
        )?;
        Ok(())
    }

    /// Record a failure. Transient failures under the retry budget go back to
    /// `queued` with exponential backoff; everything else is terminal.
    /// Returns true when the job will be retried.
    pub fn fail_job(
        &self,
        job_id: i64,
        attempts: u32,
        error: &str,
        retryable: bool,
        max_retries: u32,
        backoff_secs: u64,
    ) -> Result<bool> {
        let conn = self.connection().lock();
        if retryable && attempts <= max_retries {
            let delay = backoff_secs.saturating_mul(1u64 << (attempts.saturating_sub(1)).min(16));
            let available_at = (Utc::now() + ChronoDuration::seconds(delay as i64)).to_rfc3339();
            conn.execute(
                "UPDATE conversion_jobs \
                 SET status = 'queued', claimed_at = NULL, available_at = ?2, last_error = ?3 \
                 WHERE id = ?1",
                params![job_id, available_at, error],
            )?;
            Ok(true)
        } else {
            conn.execute(
                "UPDATE conversion_jobs SET status = 'failed', last_error = ?2 WHERE id = ?1",
                params![job_id, error],
            )?;
            Ok(false)
        }
    }

    /// Number of jobs waiting to run.
    pub fn queue_depth(&self) -> Result<usize> {
        let conn = self.connection().lock();
        let depth: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversion_jobs WHERE status = 'queued'",
            [],
            |row| row.get(0),
        )?;
        Ok(depth as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document::NewDocument;

    fn db_with_doc() -> (MetadataDb, i64) {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db
            .insert_document(&NewDocument {
                owner_id: 1,
                filename: "f.md".to_string(),
                content_type: "text/markdown".to_string(),
                sha256: "x".to_string(),
                size_bytes: 1,
                blob_key: "k".to_string(),
            })
            .unwrap();
        (db, doc.id)
    }

    #[test]
    fn enqueue_claim_complete() {
        let (db, doc_id) = db_with_doc();
        let job_id = db.enqueue_conversion(doc_id, 10).unwrap();
        assert_eq!(db.queue_depth().unwrap(), 1);

        let job = db.claim_next_job().unwrap().expect("job available");
        assert_eq!(job.id, job_id);
        assert_eq!(job.document_id, doc_id);
        assert_eq!(job.attempts, 1);
        assert_eq!(db.queue_depth().unwrap(), 0);

        // Nothing left to claim.
        assert!(db.claim_next_job().unwrap().is_none());
        db.complete_job(job.id).unwrap();
    }

    #[test]
    fn enqueue_is_idempotent_per_document() {
        let (db, doc_id) = db_with_doc();
        let a = db.enqueue_conversion(doc_id, 10).unwrap();
        let b = db.enqueue_conversion(doc_id, 10).unwrap();
        assert_eq!(a, b);
        assert_eq!(db.queue_depth().unwrap(), 1);
    }

    #[test]
    fn full_queue_reports_busy() {
        let (db, doc_id) = db_with_doc();
        db.enqueue_conversion(doc_id, 1).unwrap();
        let err = db.enqueue_conversion(doc_id + 1, 1).unwrap_err();
        assert!(matches!(err, Error::ProviderBusy(_)));
    }

    #[test]
    fn transient_failure_requeues_with_backoff() {
        let (db, doc_id) = db_with_doc();
        db.enqueue_conversion(doc_id, 10).unwrap();
        let job = db.claim_next_job().unwrap().unwrap();

        let retried = db
            .fail_job(job.id, job.attempts, "network blip", true, 3, 60)
            .unwrap();
        assert!(retried);
        // Backoff pushes availability into the future, so no immediate claim.
        assert!(db.claim_next_job().unwrap().is_none());
        assert_eq!(db.queue_depth().unwrap(), 1);
    }

    #[test]
    fn terminal_failure_stops_retrying() {
        let (db, doc_id) = db_with_doc();
        db.enqueue_conversion(doc_id, 10).unwrap();
        let job = db.claim_next_job().unwrap().unwrap();

        let retried = db
            .fail_job(job.id, job.attempts, "corrupt pdf", false, 3, 60)
            .unwrap();
        assert!(!retried);
        assert_eq!(db.queue_depth().unwrap(), 0);
        assert!(db.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn exhausted_retries_are_terminal() {
        let (db, doc_id) = db_with_doc();
        db.enqueue_conversion(doc_id, 10).unwrap();
        let job = db.claim_next_job().unwrap().unwrap();
        let retried = db
            .fail_job(job.id, 5, "still failing", true, 3, 60)
            .unwrap();
        assert!(!retried);
    }

    #[test]
    fn stale_processing_jobs_are_redelivered() {
        let (db, doc_id) = db_with_doc();
        db.enqueue_conversion(doc_id, 10).unwrap();
        let first = db.claim_next_job().unwrap().unwrap();

        // A zero-second timeout makes the fresh claim immediately stale.
        let requeued = db.requeue_stale_jobs(0).unwrap();
        assert_eq!(requeued, 1);

        let second = db.claim_next_job().unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);
    }
}
