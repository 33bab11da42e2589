//! Error types for the knowledge-base service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Service errors, one variant per kind in the internal taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// Bad input: unsupported file type, empty content, invalid parameters
    #[error("validation failed: {0}")]
    Validation(String),

    /// Document, chunk, or tenant does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Ownership or role violation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// State-machine violation (e.g. confirm before conversion is ready)
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Object store I/O failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Metadata DB failure
    #[error("database error: {0}")]
    Db(String),

    /// Vector index failure
    #[error("vector index error: {0}")]
    Vector(String),

    /// Provider unreachable or model unknown
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider rate limit exhausted
    #[error("provider busy: {0}")]
    ProviderBusy(String),

    /// Provider returned a response we cannot interpret
    #[error("bad provider response: {0}")]
    ProviderBadResponse(String),

    /// Terminal failure of a conversion attempt
    #[error("conversion failed: {0}")]
    ConversionFailed(String),

    /// Embedding dimension does not match the vector collection
    #[error("embedding dimension mismatch: collection has {expected}, embedder produces {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn db(msg: impl Into<String>) -> Self {
        Self::Db(msg.into())
    }

    pub fn vector(msg: impl Into<String>) -> Self {
        Self::Vector(msg.into())
    }

    pub fn provider_unavailable(msg: impl Into<String>) -> Self {
        Self::ProviderUnavailable(msg.into())
    }

    pub fn provider_bad_response(msg: impl Into<String>) -> Self {
        Self::ProviderBadResponse(msg.into())
    }

    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::ConversionFailed(msg.into())
    }

    /// Whether the conversion worker should retry after this error.
    ///
    /// Only infrastructure failures are retried; converter failures after the
    /// fallback + OCR ladder are terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Db(_) | Self::ProviderBusy(_) | Self::ProviderUnavailable(_)
        )
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Precondition(_) => "precondition",
            Self::Storage(_) => "storage_error",
            Self::Db(_) => "db_error",
            Self::Vector(_) => "vector_error",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::ProviderBusy(_) => "provider_busy",
            Self::ProviderBadResponse(_) => "provider_bad_response",
            Self::ConversionFailed(_) => "conversion_failed",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound("row".to_string()),
            other => Error::Db(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::ProviderUnavailable(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Precondition(_) => StatusCode::CONFLICT,
            Error::Storage(_) | Error::Db(_) | Error::Vector(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::ProviderBusy(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::ProviderBadResponse(_) => StatusCode::BAD_GATEWAY,
            Error::ConversionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::DimensionMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::storage("disk").is_transient());
        assert!(Error::db("locked").is_transient());
        assert!(!Error::conversion("bad pdf").is_transient());
        assert!(!Error::validation("empty").is_transient());
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
