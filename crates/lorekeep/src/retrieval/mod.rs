//! Retrieval service: the indexing path and the query path
//!
//! Indexing embeds a document's included chunks into the owner's partition
//! with deterministic primary keys, so re-indexing is idempotent. Queries
//! embed the question with the same embedder, search the caller's partition
//! scope, optionally rerank, and compose an answer through the configured
//! LLM with `[document_id:chunk_index]` citations. When the LLM is down the
//! caller still gets the retrieved evidence.

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::providers::ProviderRegistry;
use crate::storage::MetadataDb;
use crate::types::document::Document;
use crate::types::query::{QueryOptions, QueryScope};
use crate::types::response::{QueryAnswer, QuerySource};
use crate::types::tenant::Tenant;
use crate::vector::{VectorIndex, VectorRecord};

pub use prompt::{PromptBuilder, FALLBACK_MARKER};

const TOP_K_MAX: i64 = 50;
const RETRIEVE_CAP: usize = 100;

pub struct RetrievalService {
    db: Arc<MetadataDb>,
    vector: Arc<dyn VectorIndex>,
    providers: Arc<ProviderRegistry>,
    request_timeout: Duration,
}

impl RetrievalService {
    pub fn new(
        db: Arc<MetadataDb>,
        vector: Arc<dyn VectorIndex>,
        providers: Arc<ProviderRegistry>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            db,
            vector,
            providers,
            request_timeout,
        }
    }

    // ==================== indexing path ====================

    /// Re-embed the document's included chunks and replace its vectors in the
    /// owner's partition. Returns how many vectors were written. Does not
    /// touch document status; that belongs to the caller.
    pub async fn embed_and_store(&self, document: &Document) -> Result<usize> {
        self.vector.ensure_partition(document.owner_id).await?;
        self.vector
            .delete_by_document(document.owner_id, document.id)
            .await?;

        let chunks = self.db.included_chunks(document.id)?;
        if chunks.is_empty() {
            tracing::info!(document_id = document.id, "no included chunks, nothing to embed");
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.providers.embed(&texts).await?;

        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                document_id: document.id,
                chunk_index: chunk.chunk_index,
                embedding,
            })
            .collect();
        self.vector.upsert(document.owner_id, &records).await?;

        tracing::info!(
            document_id = document.id,
            owner_id = document.owner_id,
            vectors = records.len(),
            "indexed document chunks"
        );
        Ok(records.len())
    }

    /// Full indexing operation: embed included chunks, then mark the
    /// document `indexed`.
    pub async fn index_document(&self, document_id: i64) -> Result<usize> {
        let document = self.db.require_document(document_id)?;
        let count = self.embed_and_store(&document).await?;
        self.db.set_indexed(document_id)?;
        Ok(count)
    }

    // ==================== query path ====================

    pub async fn query(
        &self,
        caller: &Tenant,
        text: &str,
        opts: &QueryOptions,
    ) -> Result<QueryAnswer> {
        let question = text.trim();
        if question.is_empty() {
            return Err(Error::validation("query text must not be empty"));
        }

        let settings = self.db.get_settings(caller.id)?;

        let top_k = match opts.top_k {
            Some(k) if k < 1 => {
                return Err(Error::validation("top_k must be at least 1"));
            }
            Some(k) => k.min(TOP_K_MAX),
            None => settings.top_k.clamp(1, TOP_K_MAX),
        } as usize;

        let temperature = opts
            .temperature
            .unwrap_or(settings.temperature)
            .clamp(0.0, 2.0);

        let owner_scope = self.resolve_scope(caller, opts.scope)?;

        let rerank_requested = opts.rerank.unwrap_or(settings.rerank_enabled);
        let rerank_model = opts
            .rerank_model
            .clone()
            .or_else(|| settings.rerank_model.clone());
        let use_rerank =
            rerank_requested && self.providers.reranker().is_some() && rerank_model.is_some();

        let retrieve_k = if use_rerank {
            (top_k * 4).clamp(top_k, RETRIEVE_CAP)
        } else {
            top_k
        };

        let query_embedding = self
            .providers
            .embed(&[question.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider_bad_response("embedder returned no vector"))?;

        let hits = self
            .vector
            .search(&owner_scope, &query_embedding, retrieve_k)
            .await?;

        // Hydrate chunk text from the metadata DB; the index stores only
        // references. Rows deleted since indexing simply drop out.
        let mut candidates: Vec<(QuerySource, String)> = Vec::new();
        for hit in &hits {
            let Some(document) = self.db.get_document(hit.document_id)? else {
                continue;
            };
            let Some(chunk) = self.db.get_chunk(hit.document_id, hit.chunk_index)? else {
                continue;
            };
            candidates.push((
                QuerySource {
                    document_id: hit.document_id,
                    document_name: document.filename,
                    chunk_index: hit.chunk_index,
                    relevance: hit.score,
                },
                chunk.content,
            ));
        }

        if candidates.is_empty() {
            return Ok(QueryAnswer {
                query: question.to_string(),
                answer: "No relevant content found in the knowledge base.".to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                degraded: false,
            });
        }

        if use_rerank {
            if let (Some(reranker), Some(model)) = (self.providers.reranker(), &rerank_model) {
                let documents: Vec<String> =
                    candidates.iter().map(|(_, content)| content.clone()).collect();
                match reranker.rerank(model, question, &documents).await {
                    Ok(order) => {
                        let mut reordered = Vec::with_capacity(candidates.len());
                        let mut taken = vec![false; candidates.len()];
                        for (idx, _score) in order {
                            if idx < candidates.len() && !taken[idx] {
                                taken[idx] = true;
                                reordered.push(candidates[idx].clone());
                            }
                        }
                        for (idx, candidate) in candidates.iter().enumerate() {
                            if !taken[idx] {
                                reordered.push(candidate.clone());
                            }
                        }
                        candidates = reordered;
                    }
                    Err(e) => {
                        tracing::warn!("rerank skipped: {e}");
                    }
                }
            }
        }

        candidates.truncate(top_k);
        let confidence = candidates
            .iter()
            .map(|(source, _)| source.relevance)
            .fold(0.0f32, f32::max)
            .clamp(0.0, 1.0);

        let context = PromptBuilder::build_context(&candidates);
        let prompt = PromptBuilder::build_prompt(question, &context);

        let provider = opts.provider.as_deref().unwrap_or(&settings.llm_provider);
        let model = opts.model.as_deref().unwrap_or(&settings.llm_model);

        let generated = tokio::time::timeout(
            self.request_timeout,
            self.providers
                .generate(Some(provider), model, &prompt, temperature),
        )
        .await;

        let (answer, degraded) = match generated {
            Ok(Ok(answer)) => (answer.trim().to_string(), false),
            Ok(Err(e)) => {
                tracing::warn!("LLM call failed, returning degraded answer: {e}");
                (
                    PromptBuilder::build_fallback_answer(&e.to_string(), &candidates),
                    true,
                )
            }
            Err(_) => {
                tracing::warn!("LLM call timed out, returning degraded answer");
                (
                    PromptBuilder::build_fallback_answer("request deadline exceeded", &candidates),
                    true,
                )
            }
        };

        Ok(QueryAnswer {
            query: question.to_string(),
            answer,
            sources: candidates.into_iter().map(|(source, _)| source).collect(),
            confidence,
            degraded,
        })
    }

    /// Map the requested scope to a partition owner list; empty means all
    /// partitions. Non-admin callers are pinned to their own partition.
    fn resolve_scope(&self, caller: &Tenant, scope: QueryScope) -> Result<Vec<i64>> {
        if !caller.is_admin() {
            return match scope {
                QueryScope::Own => Ok(vec![caller.id]),
                _ => Err(Error::forbidden("cross-tenant queries require admin role")),
            };
        }
        Ok(match scope {
            QueryScope::Own => vec![caller.id],
            QueryScope::Tenant(owner_id) => vec![owner_id],
            QueryScope::All => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::embedding::HashEmbedder;
    use crate::types::document::NewDocument;
    use crate::vector::LocalVectorIndex;

    fn service() -> RetrievalService {
        let db = Arc::new(MetadataDb::in_memory().unwrap());
        let vector = Arc::new(LocalVectorIndex::in_memory());
        let providers = Arc::new(ProviderRegistry::with_embedder(Arc::new(
            HashEmbedder::new(128),
        )));
        RetrievalService::new(db, vector, providers, Duration::from_secs(5))
    }

    fn seed_document(svc: &RetrievalService, owner_id: i64, chunks: &[&str]) -> i64 {
        let doc = svc
            .db
            .insert_document(&NewDocument {
                owner_id,
                filename: format!("doc-{owner_id}.md"),
                content_type: "text/markdown".to_string(),
                sha256: "h".to_string(),
                size_bytes: 1,
                blob_key: "k".to_string(),
            })
            .unwrap();
        let texts: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
        svc.db.replace_chunks(doc.id, &texts).unwrap();
        doc.id
    }

    #[tokio::test]
    async fn index_then_query_returns_sources() {
        let svc = service();
        svc.vector.ensure_collection(128).await.unwrap();
        let doc_id = seed_document(
            &svc,
            7,
            &["the moon orbits the earth", "rust has a borrow checker"],
        );

        let count = svc.index_document(doc_id).await.unwrap();
        assert_eq!(count, 2);
        let doc = svc.db.require_document(doc_id).unwrap();
        assert!(doc.indexed_at.is_some());

        let answer = svc
            .query(
                &Tenant::user(7),
                "what orbits the earth",
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert!(!answer.sources.is_empty());
        assert_eq!(answer.sources[0].document_id, doc_id);
        assert!(answer.confidence > 0.0);
        // No LLM is configured in tests, so the answer degrades but keeps
        // the evidence.
        assert!(answer.degraded);
        assert!(answer.answer.starts_with(FALLBACK_MARKER));
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let svc = service();
        svc.vector.ensure_collection(128).await.unwrap();
        let doc_id = seed_document(&svc, 7, &["secret tenant seven data"]);
        svc.index_document(doc_id).await.unwrap();

        let other = svc
            .query(
                &Tenant::user(8),
                "secret tenant seven data",
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert!(other.sources.is_empty());

        let own = svc
            .query(
                &Tenant::user(7),
                "secret tenant seven data",
                &QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(own.sources[0].document_id, doc_id);
    }

    #[tokio::test]
    async fn admin_scope_widens_and_users_cannot() {
        let svc = service();
        svc.vector.ensure_collection(128).await.unwrap();
        let a = seed_document(&svc, 1, &["alpha content body"]);
        let b = seed_document(&svc, 2, &["alpha content body"]);
        svc.index_document(a).await.unwrap();
        svc.index_document(b).await.unwrap();

        let all = svc
            .query(
                &Tenant::admin(99),
                "alpha content body",
                &QueryOptions {
                    scope: QueryScope::All,
                    top_k: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let owners: std::collections::HashSet<i64> =
            all.sources.iter().map(|s| s.document_id).collect();
        assert!(owners.contains(&a) && owners.contains(&b));

        let err = svc
            .query(
                &Tenant::user(1),
                "alpha content body",
                &QueryOptions {
                    scope: QueryScope::All,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn top_k_validation_and_clamping() {
        let svc = service();
        svc.vector.ensure_collection(128).await.unwrap();

        let err = svc
            .query(
                &Tenant::user(1),
                "anything",
                &QueryOptions {
                    top_k: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // 51 clamps to 50 rather than failing.
        let ok = svc
            .query(
                &Tenant::user(1),
                "anything",
                &QueryOptions {
                    top_k: Some(51),
                    ..Default::default()
                },
            )
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let svc = service();
        svc.vector.ensure_collection(128).await.unwrap();
        let err = svc
            .query(&Tenant::user(1), "   ", &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn excluded_chunks_are_not_indexed() {
        let svc = service();
        svc.vector.ensure_collection(128).await.unwrap();
        let doc_id = seed_document(&svc, 3, &["keep this", "drop this", "keep that"]);
        svc.db.update_chunk(doc_id, 1, None, Some(false)).unwrap();

        let count = svc.index_document(doc_id).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(svc.vector.partition_size(3).await.unwrap(), 2);
    }
}
