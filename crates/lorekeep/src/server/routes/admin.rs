//! Administrative reconciliation endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reconcile::ReindexFilter;
use crate::server::state::AppState;
use crate::types::document::DocumentStatus;
use crate::types::response::ReindexReport;
use crate::types::tenant::Tenant;

#[derive(Debug, Deserialize)]
pub struct ReindexRequest {
    #[serde(default)]
    pub owner_id: Option<i64>,
    #[serde(default)]
    pub status_in: Option<Vec<String>>,
    #[serde(default)]
    pub document_ids: Option<Vec<i64>>,
}

/// POST /api/admin/reindex
pub async fn reindex(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(request): Json<ReindexRequest>,
) -> Result<Json<ReindexReport>> {
    let status_in = match request.status_in {
        Some(raw) => Some(
            raw.iter()
                .map(|s| {
                    DocumentStatus::parse(s)
                        .ok_or_else(|| Error::validation(format!("unknown status: {s}")))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    let filter = ReindexFilter {
        owner_id: request.owner_id,
        status_in,
        document_ids: request.document_ids,
    };
    Ok(Json(state.reconcile().reindex(&tenant, &filter).await?))
}

#[derive(Debug, Serialize)]
pub struct RebuildResponse {
    pub document_id: i64,
    pub vectors: usize,
}

/// POST /api/admin/documents/{id}/rebuild
pub async fn rebuild_vectors(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<RebuildResponse>> {
    let vectors = state.reconcile().rebuild_vectors(&tenant, id).await?;
    Ok(Json(RebuildResponse {
        document_id: id,
        vectors,
    }))
}
