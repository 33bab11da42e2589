//! Tenant settings endpoints

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::settings::TenantSettings;
use crate::types::tenant::Tenant;

#[derive(Debug, Deserialize)]
pub struct SettingsParams {
    /// Admins may read or write another tenant's settings.
    #[serde(default)]
    pub tenant_id: Option<i64>,
}

/// GET /api/settings
pub async fn get_settings(
    State(state): State<AppState>,
    tenant: Tenant,
    Query(params): Query<SettingsParams>,
) -> Result<Json<TenantSettings>> {
    let target = params.tenant_id.unwrap_or(tenant.id);
    Ok(Json(state.documents().get_settings(&tenant, target)?))
}

/// PUT /api/settings
pub async fn put_settings(
    State(state): State<AppState>,
    tenant: Tenant,
    Query(params): Query<SettingsParams>,
    Json(settings): Json<TenantSettings>,
) -> Result<Json<TenantSettings>> {
    let target = params.tenant_id.unwrap_or(tenant.id);
    Ok(Json(state.documents().update_settings(
        &tenant, target, &settings,
    )?))
}
