use std::sync::Arc;

use affinity_api::{
    config::Config,
    db::{create_pool, MemoryStore, PgStore},
    routes::{create_router, AppState, ServiceSettings},
    services::{EmbeddingProvider, HttpEmbeddingProvider},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "affinity_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let settings = ServiceSettings::from(&config);

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HttpEmbeddingProvider::new(
        config.embedding_service_url.clone(),
        config.embedding_timeout(),
    )?);

    let state = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.database_max_connections).await?;
            tracing::info!("Using PostgreSQL store");
            AppState::new(Arc::new(PgStore::new(pool)), embedder, settings)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            AppState::new(Arc::new(MemoryStore::new()), embedder, settings)
        }
    };

    let app = create_router(Arc::new(state));

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(address = %address, "Server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
