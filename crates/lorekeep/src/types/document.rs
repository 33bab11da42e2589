//! Document records, workflow states, and upload format detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Business workflow state of a document
///
/// `indexed` and `rejected` are quasi-terminal: a rejected document can
/// re-enter the workflow as `confirmed` via resubmit, and `approved` is the
/// transient state left behind when indexing fails (retryable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Confirmed,
    Approved,
    Indexed,
    Rejected,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Confirmed => "confirmed",
            Self::Approved => "approved",
            Self::Indexed => "indexed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "confirmed" => Some(Self::Confirmed),
            "approved" => Some(Self::Approved),
            "indexed" => Some(Self::Indexed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Conversion pipeline state, monotone `pending → processing → ready|failed`
/// except for explicit retry which moves `failed → pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A stored document with its metadata and workflow state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub owner_id: i64,
    pub filename: String,
    pub content_type: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub conversion_status: ConversionStatus,
    /// Object-store key of the original upload
    pub blob_key: String,
    /// Object-store key of the converted Markdown; None until ready
    pub markdown_key: Option<String>,
    pub conversion_error: Option<String>,
    pub reject_reason: Option<String>,
    pub preview_text: Option<String>,
    pub reviewer_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Fields needed to insert a new document row
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: i64,
    pub filename: String,
    pub content_type: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub blob_key: String,
}

/// Reviewer verdict recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewVerdict {
    Approve,
    Reject,
}

impl ReviewVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Append-only review audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAction {
    pub id: i64,
    pub document_id: i64,
    pub reviewer_id: i64,
    pub action: ReviewVerdict,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Docx,
    Xlsx,
    Csv,
    Json,
    Markdown,
    Text,
}

impl FileKind {
    /// Detect the upload format from filename extension and declared
    /// content type; extension wins when both are present.
    pub fn detect(filename: &str, content_type: &str) -> Option<Self> {
        let name = filename.to_lowercase();
        let ctype = content_type.to_lowercase();

        let by_ext = name.rsplit('.').next().and_then(|ext| match ext {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "md" | "markdown" => Some(Self::Markdown),
            "txt" | "text" => Some(Self::Text),
            _ => None,
        });
        if let Some(kind) = by_ext {
            return Some(kind);
        }

        if ctype == "application/pdf" {
            Some(Self::Pdf)
        } else if ctype.contains("wordprocessingml") {
            Some(Self::Docx)
        } else if ctype.contains("spreadsheetml") {
            Some(Self::Xlsx)
        } else if ctype == "text/csv" {
            Some(Self::Csv)
        } else if ctype == "application/json" {
            Some(Self::Json)
        } else if ctype == "text/markdown" {
            Some(Self::Markdown)
        } else if ctype.starts_with("text/plain") {
            Some(Self::Text)
        } else {
            None
        }
    }

    /// Formats converted synchronously inside the worker without the PDF
    /// provider ladder.
    pub fn is_direct(&self) -> bool {
        !matches!(self, Self::Pdf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_prefers_extension() {
        assert_eq!(
            FileKind::detect("notes.md", "application/octet-stream"),
            Some(FileKind::Markdown)
        );
        assert_eq!(FileKind::detect("report.pdf", ""), Some(FileKind::Pdf));
    }

    #[test]
    fn detect_falls_back_to_content_type() {
        assert_eq!(
            FileKind::detect("upload", "application/json"),
            Some(FileKind::Json)
        );
        assert_eq!(FileKind::detect("blob.bin", "application/zip"), None);
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            DocumentStatus::Uploaded,
            DocumentStatus::Confirmed,
            DocumentStatus::Approved,
            DocumentStatus::Indexed,
            DocumentStatus::Rejected,
        ] {
            assert_eq!(DocumentStatus::parse(s.as_str()), Some(s));
        }
        for c in [
            ConversionStatus::Pending,
            ConversionStatus::Processing,
            ConversionStatus::Ready,
            ConversionStatus::Failed,
        ] {
            assert_eq!(ConversionStatus::parse(c.as_str()), Some(c));
        }
    }
}
