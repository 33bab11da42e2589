//! Knowledge-base API server
//!
//! Run with: cargo run -p lorekeep --bin lorekeep-server [config.json]
//!
//! Conversion jobs are only enqueued here; run `lorekeep-worker` alongside
//! to process them.

use std::path::PathBuf;

use lorekeep::server::{serve, AppState};
use lorekeep::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lorekeep=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;

    tracing::info!("configuration loaded");
    tracing::info!("  embedding provider: {}", config.embeddings.provider);
    tracing::info!("  embedding dimension: {}", config.embeddings.dimension);
    tracing::info!("  llm provider: {} ({})", config.llm.provider, config.llm.model);
    tracing::info!("  object store: {:?}", config.object_store.backend);
    tracing::info!("  chunking: {:?} size {}", config.chunking.strategy, config.chunking.chunk_size);

    // Fails fast on a dimension mismatch with an existing vector collection.
    let state = AppState::new(config).await?;

    for outcome in state.providers().probe_all().await {
        if outcome.ok {
            tracing::info!(provider = %outcome.provider, "provider reachable");
        } else {
            tracing::warn!(
                provider = %outcome.provider,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "provider not reachable"
            );
        }
    }

    serve(state).await?;
    Ok(())
}
