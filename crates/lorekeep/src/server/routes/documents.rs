//! Document lifecycle endpoints

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lifecycle::BatchDeleteOutcome;
use crate::server::state::AppState;
use crate::types::document::{Document, DocumentStatus, ReviewAction};
use crate::types::tenant::Tenant;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub owner_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DocumentListResponse {
    pub documents: Vec<Document>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(String, String, Vec<u8>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload").to_string();
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::validation(format!("cannot read upload: {e}")))?;
            return Ok((filename, content_type, bytes.to_vec()));
        }
    }
    Err(Error::validation("multipart field 'file' is required"))
}

/// POST /api/documents
pub async fn upload(
    State(state): State<AppState>,
    tenant: Tenant,
    mut multipart: Multipart,
) -> Result<Json<Document>> {
    let (filename, content_type, bytes) = read_file_field(&mut multipart).await?;
    let document = state
        .documents()
        .upload(&tenant, &filename, &content_type, &bytes)
        .await?;
    Ok(Json(document))
}

/// GET /api/documents
pub async fn list(
    State(state): State<AppState>,
    tenant: Tenant,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentListResponse>> {
    let status = match &params.status {
        Some(raw) => Some(
            DocumentStatus::parse(raw)
                .ok_or_else(|| Error::validation(format!("unknown status: {raw}")))?,
        ),
        None => None,
    };
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(20);
    let (documents, total) =
        state
            .documents()
            .list(&tenant, params.owner_id, status, page, page_size)?;
    Ok(Json(DocumentListResponse {
        documents,
        total,
        page,
        page_size,
    }))
}

/// GET /api/documents/{id}
pub async fn get_one(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<Document>> {
    Ok(Json(state.documents().get_document(&tenant, id)?))
}

/// POST /api/documents/{id}/confirm
pub async fn confirm(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<Document>> {
    Ok(Json(state.documents().confirm(&tenant, id)?))
}

/// POST /api/documents/{id}/resubmit
pub async fn resubmit(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<Document>> {
    Ok(Json(state.documents().resubmit(&tenant, id)?))
}

/// POST /api/documents/{id}/convert
pub async fn retry_conversion(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<Document>> {
    Ok(Json(state.documents().retry_conversion(&tenant, id).await?))
}

/// GET /api/documents/{id}/markdown
pub async fn download_markdown(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let bytes = state.documents().download_markdown(&tenant, id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"document.md\"",
            ),
        ],
        bytes,
    ))
}

/// POST /api/documents/{id}/markdown
pub async fn upload_markdown(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<Document>> {
    let (_filename, _content_type, bytes) = read_file_field(&mut multipart).await?;
    let document = state
        .documents()
        .replace_markdown(&tenant, id, &bytes)
        .await?;
    Ok(Json(document))
}

/// GET /api/documents/{id}/reviews
pub async fn review_history(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<Vec<ReviewAction>>> {
    Ok(Json(state.documents().review_history(&tenant, id)?))
}

/// DELETE /api/documents/{id}
pub async fn delete_one(
    State(state): State<AppState>,
    tenant: Tenant,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    state.documents().delete(&tenant, id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub document_ids: Vec<i64>,
}

/// POST /api/documents/batch-delete
pub async fn batch_delete(
    State(state): State<AppState>,
    tenant: Tenant,
    Json(request): Json<BatchDeleteRequest>,
) -> Result<Json<BatchDeleteOutcome>> {
    Ok(Json(
        state
            .documents()
            .delete_many(&tenant, &request.document_ids)
            .await,
    ))
}
