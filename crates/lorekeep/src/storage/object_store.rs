//! Object store gateway
//!
//! Tenant-scoped blob storage under a fixed path convention:
//!
//! - originals: `tenant_{owner_id}/documents/{uuid}/{safe_filename}`
//! - markdown:  `tenant_{owner_id}/markdown/{document_id}.md`

use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

use google_cloud_storage::client::Client as GcsClient;
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};

use crate::error::{Error, Result};

/// Blob storage behind the tenant path convention
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Idempotent bucket/root creation or access check
    async fn ensure_bucket(&self) -> Result<()>;
}

/// Strip path separators and unsafe characters from an uploaded filename.
pub fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Key for an original upload.
pub fn document_key(owner_id: i64, upload_id: &Uuid, filename: &str) -> String {
    format!(
        "tenant_{owner_id}/documents/{upload_id}/{}",
        safe_filename(filename)
    )
}

/// Key for a converted Markdown blob.
pub fn markdown_key(owner_id: i64, document_id: i64) -> String {
    format!("tenant_{owner_id}/markdown/{document_id}.md")
}

/// Filesystem-backed store for bring-up and tests.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::storage(format!("invalid object key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::storage(format!("object not found: {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_bucket(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

/// Google Cloud Storage backend.
pub struct GcsObjectStore {
    client: GcsClient,
    bucket: String,
}

impl GcsObjectStore {
    pub async fn new(bucket: String) -> Result<Self> {
        let config = google_cloud_storage::client::ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| Error::storage(format!("cannot create GCS client: {e}")))?;
        Ok(Self {
            client: GcsClient::new(config),
            bucket,
        })
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let mut media = Media::new(key.to_string());
        media.content_type = content_type.to_string().into();
        let upload_type = UploadType::Simple(media);

        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    ..Default::default()
                },
                bytes.to_vec(),
                &upload_type,
            )
            .await
            .map_err(|e| Error::storage(format!("GCS upload failed for {key}: {e}")))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.client
            .download_object(
                &GetObjectRequest {
                    bucket: self.bucket.clone(),
                    object: key.to_string(),
                    ..Default::default()
                },
                &Range::default(),
            )
            .await
            .map_err(|e| Error::storage(format!("GCS download failed for {key}: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object(&DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object: key.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::storage(format!("GCS delete failed for {key}: {e}")))?;
        Ok(())
    }

    async fn ensure_bucket(&self) -> Result<()> {
        // Buckets are provisioned out of band; verify access instead.
        self.client
            .list_objects(&ListObjectsRequest {
                bucket: self.bucket.clone(),
                max_results: Some(1),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::storage(format!("GCS bucket {} not accessible: {e}", self.bucket)))?;
        Ok(())
    }
}
