//! Conversion worker
//!
//! Run with: cargo run -p lorekeep --bin lorekeep-worker [config.json]
//!
//! A separate process from the API server so a large PDF can never block
//! request handling. Point it at the same config file; it shares the
//! metadata DB (and its job queue) and the object store.

use std::path::PathBuf;
use std::sync::Arc;

use lorekeep::config::ObjectStoreBackend;
use lorekeep::providers::ProviderRegistry;
use lorekeep::storage::{FsObjectStore, GcsObjectStore, MetadataDb, ObjectStore};
use lorekeep::worker::ConversionWorker;
use lorekeep::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lorekeep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    let db = Arc::new(MetadataDb::new(&config.database.path)?);
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

    let worker = Arc::new(ConversionWorker::new(
        db,
        store,
        providers,
        config.chunking.split_config(),
        config.chunking.preview_chunks,
        config.conversion.clone(),
    ));

    tracing::info!(
        workers = config.conversion.effective_workers(),
        job_timeout_secs = config.conversion.job_timeout_secs,
        "conversion worker starting"
    );

    tokio::select! {
        _ = worker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    Ok(())
}
