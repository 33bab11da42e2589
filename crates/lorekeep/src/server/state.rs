//! Shared application state for the HTTP server

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, ObjectStoreBackend};
use crate::error::Result;
use crate::lifecycle::DocumentService;
use crate::providers::ProviderRegistry;
use crate::reconcile::ReconcileService;
use crate::retrieval::RetrievalService;
use crate::storage::{FsObjectStore, GcsObjectStore, MetadataDb, ObjectStore};
use crate::vector::{LocalVectorIndex, VectorIndex};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    db: Arc<MetadataDb>,
    providers: Arc<ProviderRegistry>,
    documents: Arc<DocumentService>,
    retrieval: Arc<RetrievalService>,
    reconcile: Arc<ReconcileService>,
}

impl AppState {
    /// Wire the full constructor graph. Fails fast when the embedding
    /// dimension disagrees with an existing vector collection.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let db = Arc::new(MetadataDb::new(&config.database.path)?);
        tracing::info!(path = %config.database.path.display(), "metadata DB ready");

        let store: Arc<dyn ObjectStore> = match config.object_store.backend {
            ObjectStoreBackend::Filesystem => {
                Arc::new(FsObjectStore::new(config.object_store.root.clone()))
            }
            ObjectStoreBackend::Gcs => {
                Arc::new(GcsObjectStore::new(config.object_store.bucket.clone()).await?)
            }
        };
        store.ensure_bucket().await?;

        let providers = Arc::new(ProviderRegistry::from_config(&config)?);

        let vector: Arc<dyn VectorIndex> =
            Arc::new(LocalVectorIndex::open(config.vector.snapshot_path.clone())?);
        // A dimension change against an existing collection refuses to start.
        vector.ensure_collection(providers.dimension()).await?;
        tracing::info!(dimension = providers.dimension(), "vector collection ready");

        let retrieval = Arc::new(RetrievalService::new(
            db.clone(),
            vector.clone(),
            providers.clone(),
            Duration::from_secs(config.server.request_timeout_secs),
        ));
        let documents = Arc::new(DocumentService::new(
            db.clone(),
            store,
            vector.clone(),
            providers.clone(),
            retrieval.clone(),
            &config,
        ));
        let reconcile = Arc::new(ReconcileService::new(
            db.clone(),
            vector,
            providers.clone(),
            retrieval.clone(),
        ));

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                providers,
                documents,
                retrieval,
                reconcile,
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn db(&self) -> &Arc<MetadataDb> {
        &self.inner.db
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.inner.providers
    }

    pub fn documents(&self) -> &Arc<DocumentService> {
        &self.inner.documents
    }

    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.inner.retrieval
    }

    pub fn reconcile(&self) -> &Arc<ReconcileService> {
        &self.inner.reconcile
    }
}
