//! Query-path request options

use serde::{Deserialize, Serialize};

/// Partition scope of a query.
///
/// Non-admin callers always search their own partition; the wider scopes are
/// admin-only and checked by the retrieval service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryScope {
    /// The caller's own partition
    Own,
    /// A single tenant's partition (admin)
    Tenant(i64),
    /// Every partition (admin)
    All,
}

impl Default for QueryScope {
    fn default() -> Self {
        Self::Own
    }
}

/// Per-request overrides; anything unset falls back to the caller's
/// `TenantSettings`.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<i64>,
    pub temperature: Option<f32>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub rerank: Option<bool>,
    pub rerank_model: Option<String>,
    pub scope: QueryScope,
}
