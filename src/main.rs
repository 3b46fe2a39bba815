use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use addon_recs::api::{create_router, AppState};
use addon_recs::config::{Config, StoreBackend};
use addon_recs::db::{KvStore, MemoryStore, RedisStore};
use addon_recs::services::{scheduler, DatasetCatalog, GenerationalCache, HttpDatasetSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("Failed to load config")?;

    let store: Arc<dyn KvStore> = match config.store_backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.redis_url).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-process store; generations are not shared across processes");
            Arc::new(MemoryStore::new())
        }
    };
    let source = Arc::new(HttpDatasetSource::new(config.dataset_base_url.clone()));
    let catalog = DatasetCatalog::from_config(&config);

    let cache = Arc::new(
        GenerationalCache::init(store, source, catalog, config.lease_ttl())
            .await
            .context("Failed to initialize generational cache")?,
    );

    let refresher = scheduler::spawn(cache.clone(), config.refresh_interval());

    let app = create_router(AppState::new(cache.clone(), &config));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    refresher.shutdown().await;
    cache.close().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
