use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use agora::auth::oauth::{OAuthClient, Provider};
use agora::config::{Cli, Config};
use agora::db;
use agora::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Provider secrets may live in a local .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Ensure uploads directory exists
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    let providers = Provider::configured(&config.oauth);
    if providers.is_empty() {
        tracing::info!("No external login providers configured");
    } else {
        tracing::info!(?providers, "External login enabled");
    }
    let identity = OAuthClient::new(&config.oauth)?;

    let state = AppState {
        db: pool,
        config: config.clone(),
        identity: Arc::new(identity),
    };

    let app = agora::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
