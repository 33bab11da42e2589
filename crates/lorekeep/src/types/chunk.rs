//! Chunk records: the unit of review and retrieval

use serde::{Deserialize, Serialize};

/// An ordered slice of a document's Markdown.
///
/// `chunk_index` values for a document are always dense `0..N-1`; insertions
/// and deletions renumber. `included` controls whether the chunk participates
/// in indexing. Chunk text lives only in the metadata DB; the vector index
/// carries `(document_id, chunk_index)` references back to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    pub char_count: i64,
    pub included: bool,
}
