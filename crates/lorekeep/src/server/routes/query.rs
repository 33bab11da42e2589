//! Knowledge-base query endpoint

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::query::{QueryOptions, QueryScope};
use crate::types::response::QueryAnswer;
use crate::types::tenant::Tenant;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub rerank: Option<bool>,
    #[serde(default)]
    pub rerank_model: Option<String>,
    /// "own" (default) | "tenant" (with owner_id) | "all"
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

impl QueryRequest {
    fn scope(&self) -> Result<QueryScope> {
        match self.scope.as_deref() {
            None | Some("own") | Some("self") => Ok(QueryScope::Own),
            Some("tenant") => {
                let owner_id = self
                    .owner_id
                    .ok_or_else(|| Error::validation("scope 'tenant' requires owner_id"))?;
                Ok(QueryScope::Tenant(owner_id))
            }
            Some("all") => Ok(QueryScope::All),
            Some(other) => Err(Error::validation(format!("unknown scope: {other}"))),
        }
    }
}

/// POST /api/query
pub async fn query(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryAnswer>> {
    let opts = QueryOptions {
        top_k: request.top_k,
        temperature: request.temperature,
        provider: request.provider.clone(),
        model: request.model.clone(),
        rerank: request.rerank,
        rerank_model: request.rerank_model.clone(),
        scope: request.scope()?,
    };
    let answer = state
        .retrieval()
        .query(&tenant, &request.query, &opts)
        .await?;
    Ok(Json(answer))
}
