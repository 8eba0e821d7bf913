use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use query_gateway::api;
use query_gateway::config::Config;
use query_gateway::storage::SqliteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("Starting query gateway on {}", config.server_address());
    info!("Datastore directory at {}", config.datastores.directory_url);

    // Initialize SQLite storage
    let storage = Arc::new(
        SqliteStorage::new(&config.database.url)
            .await
            .map_err(|e| {
                error!("Failed to initialize database: {}", e);
                e
            })
            .with_context(|| format!("Failed to open {}", config.database.url))?,
    );

    let app: Router = api::routes::create_router_with_state(storage, config.clone());

    // Start server
    let addr: SocketAddr = config
        .server_address()
        .parse()
        .context("Invalid server address")?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
