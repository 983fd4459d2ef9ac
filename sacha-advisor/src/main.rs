//! sacha-advisor - Financial Document Explanation Microservice
//!
//! **Module Identity:**
//! - Name: sacha-advisor
//! - Default port: 5780
//!
//! Explains uploaded financial documents (insurance, loans, investments) in plain
//! language via an OpenAI-compatible chat-completions API.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sacha_advisor::config::{resolve_openai_api_key, AdvisorConfig, CONFIG_FILE_NAME};
use sacha_advisor::services::{DocumentTextExtractor, OpenAiClient};
use sacha_advisor::AppState;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "sacha-advisor")]
#[command(about = "Financial document explanation microservice")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "SACHA_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "SACHA_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long, env = "SACHA_HOST")]
    host: Option<String>,

    /// SQLite database path (overrides config)
    #[arg(short, long, env = "SACHA_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = sacha_common::config::resolve_config_path(
        args.config.as_deref(),
        "SACHA_CONFIG",
        CONFIG_FILE_NAME,
    );
    let mut config: AdvisorConfig = sacha_common::config::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "sacha_advisor={level},sacha_common={level},tower_http={level}",
                    level = config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting sacha-advisor v{}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file found, using defaults"),
    }

    config.validate().context("Invalid configuration")?;

    let api_key = resolve_openai_api_key(&config.openai)?;
    let analyst = OpenAiClient::new(&config.openai, api_key)
        .map_err(|e| anyhow::anyhow!("Failed to create OpenAI client: {}", e))?;
    info!("AI model: {} ({})", config.openai.model, config.openai.base_url);

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = sacha_advisor::db::init_database_pool(&db_path)
        .await
        .context("Failed to initialize database")?;

    info!(
        "Cache: enabled={}, max_size={}, ttl={}s",
        config.cache.enabled, config.cache.max_size, config.cache.ttl_seconds
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(
        db_pool.clone(),
        Arc::new(analyst),
        Arc::new(DocumentTextExtractor),
        config,
    );
    let recorder = state.recorder.clone();
    let app = sacha_advisor::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Draining pending lifecycle records");
    recorder.drain().await;
    db_pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
