//! Chunk review and editing endpoints

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::chunk::Chunk;
use crate::types::tenant::Tenant;

#[derive(Debug, Deserialize)]
pub struct ChunkListParams {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ChunkListResponse {
    pub document_id: i64,
    pub chunks: Vec<Chunk>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// GET /api/documents/{id}/chunks
pub async fn list(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
    Query(params): Query<ChunkListParams>,
) -> Result<Json<ChunkListResponse>> {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(50);
    let (chunks, total) = state.documents().list_chunks(&tenant, id, page, page_size)?;
    Ok(Json(ChunkListResponse {
        document_id: id,
        chunks,
        total,
        page,
        page_size,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChunkCreateRequest {
    pub content: String,
}

/// POST /api/documents/{id}/chunks
pub async fn create(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
    Json(request): Json<ChunkCreateRequest>,
) -> Result<Json<Chunk>> {
    Ok(Json(
        state
            .documents()
            .create_chunk(&tenant, id, &request.content)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ChunkUpdateRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub included: Option<bool>,
    #[serde(default)]
    pub sync_vectors: bool,
}

/// PATCH /api/documents/{id}/chunks/{index}
pub async fn update(
    State(state): State<AppState>,
    tenant: Tenant,
    Path((id, index)): Path<(i64, i64)>,
    Json(request): Json<ChunkUpdateRequest>,
) -> Result<Json<Chunk>> {
    Ok(Json(
        state
            .documents()
            .update_chunk(
                &tenant,
                id,
                index,
                request.content.as_deref(),
                request.included,
                request.sync_vectors,
            )
            .await?,
    ))
}

/// DELETE /api/documents/{id}/chunks/{index}
pub async fn delete_one(
    State(state): State<AppState>,
    tenant: Tenant,
    Path((id, index)): Path<(i64, i64)>,
) -> Result<Json<serde_json::Value>> {
    state.documents().delete_chunk(&tenant, id, index).await?;
    Ok(Json(serde_json::json!({
        "document_id": id,
        "deleted_chunk_index": index,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ReembedRequest {
    #[serde(default)]
    pub chunk_indices: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReembedResponse {
    pub document_id: i64,
    pub reembedded_chunks: usize,
}

/// POST /api/documents/{id}/chunks/reembed
pub async fn reembed(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
    Json(request): Json<ReembedRequest>,
) -> Result<Json<ReembedResponse>> {
    let reembedded = state
        .reconcile()
        .reembed_chunks(&tenant, id, &request.chunk_indices)
        .await?;
    Ok(Json(ReembedResponse {
        document_id: id,
        reembedded_chunks: reembedded,
    }))
}
