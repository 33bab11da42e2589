//! Reviewer endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::document::Document;
use crate::types::tenant::Tenant;

#[derive(Debug, Serialize)]
pub struct PendingReviewItem {
    #[serde(flatten)]
    pub document: Document,
    pub chunk_count: usize,
}

/// GET /api/review/pending
pub async fn pending(
    State(state): State<AppState>,
    tenant: Tenant,
) -> Result<Json<Vec<PendingReviewItem>>> {
    let items = state
        .documents()
        .list_pending_reviews(&tenant)?
        .into_iter()
        .map(|(document, chunk_count)| PendingReviewItem {
            document,
            chunk_count,
        })
        .collect();
    Ok(Json(items))
}

/// POST /api/review/{id}/approve
pub async fn approve(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<Document>> {
    Ok(Json(state.documents().approve(&tenant, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// POST /api/review/{id}/reject
pub async fn reject(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<Document>> {
    Ok(Json(state.documents().reject(&tenant, id, &request.reason)?))
}
