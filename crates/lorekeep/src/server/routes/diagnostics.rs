//! Health and connectivity diagnostics

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::Result;
use crate::providers::registry::ProbeOutcome;
use crate::server::state::AppState;
use crate::types::tenant::Tenant;

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsResponse {
    pub providers: Vec<ProbeOutcome>,
    pub embedding_dimension: usize,
    pub conversion_queue_depth: usize,
}

/// GET /api/diagnostics
pub async fn diagnostics(
    State(state): State<AppState>,
    _tenant: Tenant,
) -> Result<Json<DiagnosticsResponse>> {
    let providers = state.providers().probe_all().await;
    Ok(Json(DiagnosticsResponse {
        providers,
        embedding_dimension: state.providers().dimension(),
        conversion_queue_depth: state.db().queue_depth()?,
    }))
}
