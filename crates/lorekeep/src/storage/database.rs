//! Metadata DB: documents, chunks, review audit, tenant settings
//!
//! SQLite behind a single connection mutex; WAL mode so the server and the
//! conversion worker can share the file. Postgres-style invariants are kept
//! here: chunk indices stay dense per document, chunk replacement is
//! transactional, and cascade delete covers chunks and review actions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::chunk::Chunk;
use crate::types::document::{
    ConversionStatus, Document, DocumentStatus, NewDocument, ReviewAction, ReviewVerdict,
};
use crate::types::settings::TenantSettings;

/// Document listing filter
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub owner_id: Option<i64>,
    pub status: Option<DocumentStatus>,
    /// Hide rejected documents when no explicit status filter is set
    pub hide_rejected: bool,
    pub page: usize,
    pub page_size: usize,
}

pub struct MetadataDb {
    conn: Arc<Mutex<Connection>>,
}

impl MetadataDb {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    pub(crate) fn connection(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                filename TEXT NOT NULL,
                content_type TEXT NOT NULL,
                sha256 TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'uploaded',
                conversion_status TEXT NOT NULL DEFAULT 'pending',
                blob_key TEXT NOT NULL,
                markdown_key TEXT,
                conversion_error TEXT,
                reject_reason TEXT,
                preview_text TEXT,
                reviewer_id INTEGER,
                created_at TEXT NOT NULL,
                confirmed_at TEXT,
                reviewed_at TEXT,
                indexed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);
            CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
            CREATE INDEX IF NOT EXISTS idx_documents_status_owner ON documents(status, owner_id);

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                char_count INTEGER NOT NULL,
                included INTEGER NOT NULL DEFAULT 1,
                UNIQUE(document_id, chunk_index)
            );
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

            CREATE TABLE IF NOT EXISTS review_actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                reviewer_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_review_actions_document ON review_actions(document_id);

            CREATE TABLE IF NOT EXISTS tenant_settings (
                tenant_id INTEGER PRIMARY KEY,
                llm_provider TEXT NOT NULL,
                llm_model TEXT NOT NULL,
                embedding_provider TEXT NOT NULL,
                embedding_model TEXT NOT NULL,
                top_k INTEGER NOT NULL,
                temperature REAL NOT NULL,
                rerank_enabled INTEGER NOT NULL,
                rerank_provider TEXT NOT NULL,
                rerank_model TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversion_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                attempts INTEGER NOT NULL DEFAULT 0,
                available_at TEXT NOT NULL,
                claimed_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON conversion_jobs(status);
            "#,
        )?;
        Ok(())
    }

    // ==================== documents ====================

    pub fn insert_document(&self, new: &NewDocument) -> Result<Document> {
        let conn = self.conn.lock();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO documents (
                owner_id, filename, content_type, sha256, size_bytes,
                status, conversion_status, blob_key, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'uploaded', 'pending', ?6, ?7)
            "#,
            params![
                new.owner_id,
                new.filename,
                new.content_type,
                new.sha256,
                new.size_bytes,
                new.blob_key,
                now,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.require_document(id)
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                row_to_document,
            )
            .optional()?;
        Ok(doc)
    }

    pub fn require_document(&self, id: i64) -> Result<Document> {
        self.get_document(id)?
            .ok_or_else(|| Error::not_found(format!("document {id}")))
    }

    pub fn list_documents(&self, filter: &DocumentFilter) -> Result<(Vec<Document>, usize)> {
        let mut where_clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(owner_id) = filter.owner_id {
            where_clauses.push(format!("owner_id = ?{}", args.len() + 1));
            args.push(Box::new(owner_id));
        }
        match filter.status {
            Some(status) => {
                where_clauses.push(format!("status = ?{}", args.len() + 1));
                args.push(Box::new(status.as_str().to_string()));
            }
            None if filter.hide_rejected => {
                where_clauses.push("status != 'rejected'".to_string());
            }
            None => {}
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 100);
        let offset = (page - 1) * page_size;

        let conn = self.conn.lock();
        let total: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM documents {where_sql}"),
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            |row| row.get::<_, i64>(0),
        )? as usize;

        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents {where_sql} \
             ORDER BY created_at DESC, id DESC LIMIT {page_size} OFFSET {offset}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                row_to_document,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((docs, total))
    }

    /// Documents selected for a bulk reindex.
    pub fn documents_for_reindex(
        &self,
        owner_id: Option<i64>,
        status_in: &[DocumentStatus],
        document_ids: Option<&[i64]>,
    ) -> Result<Vec<Document>> {
        let conn = self.conn.lock();

        let sql = if let Some(ids) = document_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id IN ({}) ORDER BY id ASC",
                placeholders.join(",")
            )
        } else {
            let statuses: Vec<String> = status_in
                .iter()
                .map(|s| format!("'{}'", s.as_str()))
                .collect();
            let mut sql = format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE status IN ({})",
                statuses.join(",")
            );
            if let Some(owner) = owner_id {
                sql.push_str(&format!(" AND owner_id = {owner}"));
            }
            sql.push_str(" ORDER BY id ASC");
            sql
        };

        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map([], row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(docs)
    }

    /// Confirmed documents with conversion ready, plus chunk counts, newest
    /// first: the reviewer's queue.
    pub fn pending_reviews(&self) -> Result<Vec<(Document, usize)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS},
                    (SELECT COUNT(*) FROM chunks c WHERE c.document_id = documents.id)
             FROM documents
             WHERE status = 'confirmed' AND conversion_status = 'ready'
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let doc = row_to_document(row)?;
                let count: i64 = row.get(18)?;
                Ok((doc, count as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Claim the document for conversion: `pending|failed -> processing`.
    /// Returns false when another worker already claimed it.
    pub fn try_begin_conversion(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE documents SET conversion_status = 'processing', conversion_error = NULL \
             WHERE id = ?1 AND conversion_status IN ('pending', 'failed')",
            params![id],
        )?;
        Ok(changed > 0)
    }

    pub fn finish_conversion_ready(
        &self,
        id: i64,
        markdown_key: &str,
        preview_text: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET conversion_status = 'ready', markdown_key = ?2, \
             conversion_error = NULL, preview_text = ?3 WHERE id = ?1",
            params![id, markdown_key, preview_text],
        )?;
        Ok(())
    }

    pub fn finish_conversion_failed(&self, id: i64, error: &str) -> Result<()> {
        let error = if error.is_empty() { "conversion failed" } else { error };
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET conversion_status = 'failed', conversion_error = ?2 WHERE id = ?1",
            params![id, error],
        )?;
        Ok(())
    }

    /// Put the document back into `pending` (explicit retry, or transient
    /// worker failure awaiting redelivery).
    pub fn reset_conversion_pending(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET conversion_status = 'pending', conversion_error = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Record a user-supplied Markdown replacement: conversion becomes ready
    /// and the document moves to `confirmed` since the owner has edited the
    /// authoritative content.
    pub fn set_markdown_replaced(&self, id: i64, markdown_key: &str, preview: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET conversion_status = 'ready', markdown_key = ?2, \
             conversion_error = NULL, preview_text = ?3, status = 'confirmed', confirmed_at = ?4 \
             WHERE id = ?1",
            params![id, markdown_key, preview, now],
        )?;
        Ok(())
    }

    pub fn set_confirmed(&self, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET status = 'confirmed', confirmed_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    pub fn set_approved(&self, id: i64, reviewer_id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET status = 'approved', reviewer_id = ?2, reviewed_at = ?3, \
             reject_reason = NULL WHERE id = ?1",
            params![id, reviewer_id, now],
        )?;
        Ok(())
    }

    pub fn set_indexed(&self, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET status = 'indexed', indexed_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    pub fn set_rejected(&self, id: i64, reviewer_id: i64, reason: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET status = 'rejected', reviewer_id = ?2, reviewed_at = ?3, \
             reject_reason = ?4 WHERE id = ?1",
            params![id, reviewer_id, now, reason],
        )?;
        Ok(())
    }

    /// Rejected document re-enters the workflow as confirmed.
    pub fn set_resubmitted(&self, id: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE documents SET status = 'confirmed', confirmed_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// Delete the document row; chunks and review actions cascade.
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    // ==================== chunks ====================

    /// Replace every chunk of a document in one transaction; indices come out
    /// dense and `included` resets to true. Empty pieces are skipped and NUL
    /// bytes scrubbed.
    pub fn replace_chunks(&self, document_id: i64, texts: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?;

        let mut index = 0i64;
        for text in texts {
            let content = text.replace('\0', "");
            if content.trim().is_empty() {
                continue;
            }
            let char_count = content.chars().count() as i64;
            tx.execute(
                "INSERT INTO chunks (document_id, chunk_index, content, char_count, included) \
                 VALUES (?1, ?2, ?3, ?4, 1)",
                params![document_id, index, content, char_count],
            )?;
            index += 1;
        }
        tx.commit()?;
        Ok(index as usize)
    }

    pub fn list_chunks(
        &self,
        document_id: i64,
        page: usize,
        page_size: usize,
    ) -> Result<(Vec<Chunk>, usize)> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);
        let offset = (page - 1) * page_size;

        let conn = self.conn.lock();
        let total: usize = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
            params![document_id],
            |row| row.get::<_, i64>(0),
        )? as usize;

        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE document_id = ?1 \
             ORDER BY chunk_index ASC LIMIT {page_size} OFFSET {offset}"
        ))?;
        let chunks = stmt
            .query_map(params![document_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((chunks, total))
    }

    pub fn all_chunks(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC"
        ))?;
        let chunks = stmt
            .query_map(params![document_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn included_chunks(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks \
             WHERE document_id = ?1 AND included = 1 ORDER BY chunk_index ASC"
        ))?;
        let chunks = stmt
            .query_map(params![document_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    pub fn get_chunk(&self, document_id: i64, chunk_index: i64) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        let chunk = conn
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks \
                     WHERE document_id = ?1 AND chunk_index = ?2"
                ),
                params![document_id, chunk_index],
                row_to_chunk,
            )
            .optional()?;
        Ok(chunk)
    }

    pub fn count_chunks(&self, document_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Append a chunk at the next dense index.
    pub fn append_chunk(&self, document_id: i64, content: &str) -> Result<Chunk> {
        let content = content.replace('\0', "");
        if content.trim().is_empty() {
            return Err(Error::validation("chunk content must not be empty"));
        }
        let char_count = content.chars().count() as i64;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let next_index: i64 = tx.query_row(
            "SELECT COALESCE(MAX(chunk_index) + 1, 0) FROM chunks WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO chunks (document_id, chunk_index, content, char_count, included) \
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![document_id, next_index, content, char_count],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Chunk {
            id,
            document_id,
            chunk_index: next_index,
            content,
            char_count,
            included: true,
        })
    }

    pub fn update_chunk(
        &self,
        document_id: i64,
        chunk_index: i64,
        content: Option<&str>,
        included: Option<bool>,
    ) -> Result<Chunk> {
        if content.is_none() && included.is_none() {
            return Err(Error::validation("nothing to update"));
        }
        if let Some(text) = content {
            if text.trim().is_empty() {
                return Err(Error::validation("chunk content must not be empty"));
            }
        }

        let conn = self.conn.lock();
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks \
                     WHERE document_id = ?1 AND chunk_index = ?2"
                ),
                params![document_id, chunk_index],
                row_to_chunk,
            )
            .optional()?
            .ok_or_else(|| {
                Error::not_found(format!("chunk {chunk_index} of document {document_id}"))
            })?;

        let new_content = content
            .map(|c| c.replace('\0', ""))
            .unwrap_or(existing.content);
        let new_included = included.unwrap_or(existing.included);
        let char_count = new_content.chars().count() as i64;

        conn.execute(
            "UPDATE chunks SET content = ?3, char_count = ?4, included = ?5 \
             WHERE document_id = ?1 AND chunk_index = ?2",
            params![document_id, chunk_index, new_content, char_count, new_included],
        )?;

        Ok(Chunk {
            id: existing.id,
            document_id,
            chunk_index,
            content: new_content,
            char_count,
            included: new_included,
        })
    }

    /// Delete a chunk and renumber the rest so indices stay dense.
    pub fn delete_chunk(&self, document_id: i64, chunk_index: i64) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let deleted = tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1 AND chunk_index = ?2",
            params![document_id, chunk_index],
        )?;
        if deleted == 0 {
            return Err(Error::not_found(format!(
                "chunk {chunk_index} of document {document_id}"
            )));
        }

        // Two passes through negative space so the unique (document_id,
        // chunk_index) constraint never sees a transient collision.
        tx.execute(
            "UPDATE chunks SET chunk_index = -chunk_index \
             WHERE document_id = ?1 AND chunk_index > ?2",
            params![document_id, chunk_index],
        )?;
        tx.execute(
            "UPDATE chunks SET chunk_index = -chunk_index - 1 \
             WHERE document_id = ?1 AND chunk_index < 0",
            params![document_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    // ==================== review actions ====================

    pub fn add_review_action(
        &self,
        document_id: i64,
        reviewer_id: i64,
        action: ReviewVerdict,
        reason: Option<&str>,
    ) -> Result<ReviewAction> {
        let now = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO review_actions (document_id, reviewer_id, action, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                document_id,
                reviewer_id,
                action.as_str(),
                reason,
                now.to_rfc3339()
            ],
        )?;
        Ok(ReviewAction {
            id: conn.last_insert_rowid(),
            document_id,
            reviewer_id,
            action,
            reason: reason.map(|r| r.to_string()),
            created_at: now,
        })
    }

    pub fn list_review_actions(&self, document_id: i64) -> Result<Vec<ReviewAction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, reviewer_id, action, reason, created_at \
             FROM review_actions WHERE document_id = ?1 ORDER BY id ASC",
        )?;
        let actions = stmt
            .query_map(params![document_id], |row| {
                let action_str: String = row.get(3)?;
                let created_at: String = row.get(5)?;
                Ok(ReviewAction {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    reviewer_id: row.get(2)?,
                    action: ReviewVerdict::parse(&action_str).unwrap_or(ReviewVerdict::Reject),
                    reason: row.get(4)?,
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(actions)
    }

    // ==================== tenant settings ====================

    pub fn get_settings(&self, tenant_id: i64) -> Result<TenantSettings> {
        let conn = self.conn.lock();
        let settings = conn
            .query_row(
                "SELECT llm_provider, llm_model, embedding_provider, embedding_model, \
                        top_k, temperature, rerank_enabled, rerank_provider, rerank_model \
                 FROM tenant_settings WHERE tenant_id = ?1",
                params![tenant_id],
                |row| {
                    Ok(TenantSettings {
                        llm_provider: row.get(0)?,
                        llm_model: row.get(1)?,
                        embedding_provider: row.get(2)?,
                        embedding_model: row.get(3)?,
                        top_k: row.get(4)?,
                        temperature: row.get(5)?,
                        rerank_enabled: row.get::<_, i64>(6)? != 0,
                        rerank_provider: row.get(7)?,
                        rerank_model: row.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(settings.unwrap_or_default())
    }

    pub fn upsert_settings(&self, tenant_id: i64, settings: &TenantSettings) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO tenant_settings (
                tenant_id, llm_provider, llm_model, embedding_provider, embedding_model,
                top_k, temperature, rerank_enabled, rerank_provider, rerank_model, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(tenant_id) DO UPDATE SET
                llm_provider = excluded.llm_provider,
                llm_model = excluded.llm_model,
                embedding_provider = excluded.embedding_provider,
                embedding_model = excluded.embedding_model,
                top_k = excluded.top_k,
                temperature = excluded.temperature,
                rerank_enabled = excluded.rerank_enabled,
                rerank_provider = excluded.rerank_provider,
                rerank_model = excluded.rerank_model,
                updated_at = excluded.updated_at
            "#,
            params![
                tenant_id,
                settings.llm_provider,
                settings.llm_model,
                settings.embedding_provider,
                settings.embedding_model,
                settings.top_k,
                settings.temperature,
                settings.rerank_enabled as i64,
                settings.rerank_provider,
                settings.rerank_model,
                now,
            ],
        )?;
        Ok(())
    }
}

const DOCUMENT_COLUMNS: &str = "id, owner_id, filename, content_type, sha256, size_bytes, \
    status, conversion_status, blob_key, markdown_key, conversion_error, reject_reason, \
    preview_text, reviewer_id, created_at, confirmed_at, reviewed_at, indexed_at";

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, content, char_count, included";

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_timestamp_opt(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.map(|r| parse_timestamp(&r))
}

fn row_to_document(row: &rusqlite::Row) -> rusqlite::Result<Document> {
    let status_str: String = row.get(6)?;
    let conversion_str: String = row.get(7)?;
    let created_at: String = row.get(14)?;
    Ok(Document {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        filename: row.get(2)?,
        content_type: row.get(3)?,
        sha256: row.get(4)?,
        size_bytes: row.get(5)?,
        status: DocumentStatus::parse(&status_str).unwrap_or(DocumentStatus::Uploaded),
        conversion_status: ConversionStatus::parse(&conversion_str)
            .unwrap_or(ConversionStatus::Pending),
        blob_key: row.get(8)?,
        markdown_key: row.get(9)?,
        conversion_error: row.get(10)?,
        reject_reason: row.get(11)?,
        preview_text: row.get(12)?,
        reviewer_id: row.get(13)?,
        created_at: parse_timestamp(&created_at),
        confirmed_at: parse_timestamp_opt(row.get(15)?),
        reviewed_at: parse_timestamp_opt(row.get(16)?),
        indexed_at: parse_timestamp_opt(row.get(17)?),
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        chunk_index: row.get(2)?,
        content: row.get(3)?,
        char_count: row.get(4)?,
        included: row.get::<_, i64>(5)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(owner_id: i64) -> NewDocument {
        NewDocument {
            owner_id,
            filename: "test.md".to_string(),
            content_type: "text/markdown".to_string(),
            sha256: "abc".to_string(),
            size_bytes: 10,
            blob_key: "tenant_1/documents/u/test.md".to_string(),
        }
    }

    #[test]
    fn insert_and_fetch_document() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert_eq!(doc.conversion_status, ConversionStatus::Pending);

        let fetched = db.require_document(doc.id).unwrap();
        assert_eq!(fetched.filename, "test.md");
        assert!(db.get_document(9999).unwrap().is_none());
    }

    #[test]
    fn conversion_claim_is_exclusive() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();

        assert!(db.try_begin_conversion(doc.id).unwrap());
        // Second claim fails while processing.
        assert!(!db.try_begin_conversion(doc.id).unwrap());

        db.finish_conversion_failed(doc.id, "boom").unwrap();
        // Failed conversions can be claimed again.
        assert!(db.try_begin_conversion(doc.id).unwrap());
    }

    #[test]
    fn failed_conversion_records_error() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();
        db.try_begin_conversion(doc.id).unwrap();
        db.finish_conversion_failed(doc.id, "parser exploded").unwrap();

        let doc = db.require_document(doc.id).unwrap();
        assert_eq!(doc.conversion_status, ConversionStatus::Failed);
        assert_eq!(doc.conversion_error.as_deref(), Some("parser exploded"));
    }

    #[test]
    fn replace_chunks_is_dense_and_skips_empties() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();

        let texts = vec![
            "first".to_string(),
            "  ".to_string(),
            "sec\0ond".to_string(),
            "third".to_string(),
        ];
        let count = db.replace_chunks(doc.id, &texts).unwrap();
        assert_eq!(count, 3);

        let chunks = db.all_chunks(doc.id).unwrap();
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(chunks[1].content, "second");
        assert!(chunks.iter().all(|c| c.included));
    }

    #[test]
    fn delete_chunk_renumbers_densely() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();
        let texts: Vec<String> = (0..5).map(|i| format!("chunk {i}")).collect();
        db.replace_chunks(doc.id, &texts).unwrap();

        db.delete_chunk(doc.id, 2).unwrap();

        let chunks = db.all_chunks(doc.id).unwrap();
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["chunk 0", "chunk 1", "chunk 3", "chunk 4"]);
    }

    #[test]
    fn delete_missing_chunk_is_not_found() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();
        let err = db.delete_chunk(doc.id, 0).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn append_chunk_extends_densely() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();
        db.replace_chunks(doc.id, &["a".to_string(), "b".to_string()])
            .unwrap();

        let chunk = db.append_chunk(doc.id, "c").unwrap();
        assert_eq!(chunk.chunk_index, 2);
        assert_eq!(db.count_chunks(doc.id).unwrap(), 3);
    }

    #[test]
    fn update_chunk_content_and_inclusion() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();
        db.replace_chunks(doc.id, &["original".to_string()]).unwrap();

        let updated = db
            .update_chunk(doc.id, 0, Some("edited"), None)
            .unwrap();
        assert_eq!(updated.content, "edited");
        assert!(updated.included);

        let toggled = db.update_chunk(doc.id, 0, None, Some(false)).unwrap();
        assert!(!toggled.included);
        assert_eq!(toggled.content, "edited");

        assert!(db.included_chunks(doc.id).unwrap().is_empty());
        assert!(db.update_chunk(doc.id, 0, None, None).is_err());
    }

    #[test]
    fn document_delete_cascades_to_chunks() {
        let db = MetadataDb::in_memory().unwrap();
        let doc = db.insert_document(&new_doc(1)).unwrap();
        db.replace_chunks(doc.id, &["a".to_string()]).unwrap();
        db.add_review_action(doc.id, 99, ReviewVerdict::Approve, None)
            .unwrap();

        assert!(db.delete_document(doc.id).unwrap());
        assert_eq!(db.count_chunks(doc.id).unwrap(), 0);
        assert!(db.list_review_actions(doc.id).unwrap().is_empty());
    }

    #[test]
    fn listing_hides_rejected_without_filter() {
        let db = MetadataDb::in_memory().unwrap();
        let keep = db.insert_document(&new_doc(1)).unwrap();
        let rejected = db.insert_document(&new_doc(1)).unwrap();
        db.set_rejected(rejected.id, 9, "not suitable").unwrap();

        let (docs, total) = db
            .list_documents(&DocumentFilter {
                owner_id: Some(1),
                hide_rejected: true,
                page: 1,
                page_size: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(docs[0].id, keep.id);

        let (docs, _) = db
            .list_documents(&DocumentFilter {
                owner_id: Some(1),
                status: Some(DocumentStatus::Rejected),
                page: 1,
                page_size: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, rejected.id);
    }

    #[test]
    fn settings_default_and_roundtrip() {
        let db = MetadataDb::in_memory().unwrap();
        let defaults = db.get_settings(5).unwrap();
        assert_eq!(defaults.top_k, 5);

        let mut settings = defaults.clone();
        settings.top_k = 12;
        settings.rerank_enabled = true;
        settings.rerank_model = Some("bge-reranker".to_string());
        db.upsert_settings(5, &settings).unwrap();

        let loaded = db.get_settings(5).unwrap();
        assert_eq!(loaded.top_k, 12);
        assert!(loaded.rerank_enabled);
        assert_eq!(loaded.rerank_model.as_deref(), Some("bge-reranker"));
    }

    #[test]
    fn pending_reviews_requires_confirmed_and_ready() {
        let db = MetadataDb::in_memory().unwrap();
        let a = db.insert_document(&new_doc(1)).unwrap();
        let b = db.insert_document(&new_doc(2)).unwrap();

        // a: confirmed + ready, b: confirmed but still pending conversion.
        db.try_begin_conversion(a.id).unwrap();
        db.finish_conversion_ready(a.id, "tenant_1/markdown/1.md", "preview")
            .unwrap();
        db.replace_chunks(a.id, &["x".to_string(), "y".to_string()])
            .unwrap();
        db.set_confirmed(a.id).unwrap();
        db.set_confirmed(b.id).unwrap();

        let pending = db.pending_reviews().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0.id, a.id);
        assert_eq!(pending[0].1, 2);
    }
}
