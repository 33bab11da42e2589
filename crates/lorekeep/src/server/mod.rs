//! HTTP contract surface
//!
//! The authentication layer in front of this service resolves tokens to a
//! `(tenant_id, role)` pair and forwards it in the `x-tenant-id` and
//! `x-tenant-role` headers; the core never parses tokens. Routes are a thin
//! layer over the lifecycle, retrieval, and reconciliation services.

pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, FromRequestParts};
use axum::http::request::Parts;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::types::tenant::{Role, Tenant};

pub use state::AppState;

/// Tenant identity extractor: trusts the upstream auth layer's headers.
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| Error::forbidden("missing or invalid x-tenant-id header"))?;
        let role = parts
            .headers
            .get("x-tenant-role")
            .and_then(|v| v.to_str().ok())
            .and_then(Role::parse)
            .ok_or_else(|| Error::forbidden("missing or invalid x-tenant-role header"))?;
        Ok(Tenant { id, role })
    }
}

pub fn build_router(state: AppState) -> Router {
    let max_upload = state.config().server.max_upload_size;
    let enable_cors = state.config().server.enable_cors;

    let mut router = Router::new()
        .route("/health", get(routes::diagnostics::health))
        .route("/api/diagnostics", get(routes::diagnostics::diagnostics))
        // documents
        .route("/api/documents", post(routes::documents::upload))
        .route("/api/documents", get(routes::documents::list))
        .route("/api/documents/batch-delete", post(routes::documents::batch_delete))
        .route("/api/documents/{id}", get(routes::documents::get_one))
        .route("/api/documents/{id}", delete(routes::documents::delete_one))
        .route("/api/documents/{id}/confirm", post(routes::documents::confirm))
        .route("/api/documents/{id}/resubmit", post(routes::documents::resubmit))
        .route("/api/documents/{id}/convert", post(routes::documents::retry_conversion))
        .route("/api/documents/{id}/markdown", get(routes::documents::download_markdown))
        .route("/api/documents/{id}/markdown", post(routes::documents::upload_markdown))
        .route("/api/documents/{id}/reviews", get(routes::documents::review_history))
        // chunks
        .route("/api/documents/{id}/chunks", get(routes::chunks::list))
        .route("/api/documents/{id}/chunks", post(routes::chunks::create))
        .route("/api/documents/{id}/chunks/reembed", post(routes::chunks::reembed))
        .route("/api/documents/{id}/chunks/{index}", patch(routes::chunks::update))
        .route("/api/documents/{id}/chunks/{index}", delete(routes::chunks::delete_one))
        // review
        .route("/api/review/pending", get(routes::review::pending))
        .route("/api/review/{id}/approve", post(routes::review::approve))
        .route("/api/review/{id}/reject", post(routes::review::reject))
        // query
        .route("/api/query", post(routes::query::query))
        // settings
        .route("/api/settings", get(routes::settings::get_settings))
        .route("/api/settings", put(routes::settings::put_settings))
        // admin
        .route("/api/admin/reindex", post(routes::admin::reindex))
        .route(
            "/api/admin/documents/{id}/rebuild",
            post(routes::admin::rebuild_vectors),
        )
        .layer(DefaultBodyLimit::max(max_upload + 1024 * 1024))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState) -> crate::error::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config().server.host,
        state.config().server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::storage(format!("cannot bind {addr}: {e}")))?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| Error::storage(format!("server error: {e}")))?;
    Ok(())
}
