use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use whisper::config::{Config, DeliveryMode};
use whisper::db::Stores;
use whisper::AppState;

#[derive(Parser, Debug)]
#[command(name = "whisper")]
#[command(author, version, about = "A lightweight OTP-login chat server", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "whisper.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Whisper v{}", env!("CARGO_PKG_VERSION"));

    if config.delivery.fail_open && config.delivery.mode != DeliveryMode::Console {
        tracing::warn!(
            "delivery.fail_open is enabled: failed code deliveries will not fail requests. \
             Disable this outside of demo/dev deployments."
        );
    }

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir)?;

    // Initialize database and stores
    let pool = whisper::db::init(&config.server.data_dir).await?;
    let stores = Stores::sqlite(pool);

    // Build the code dispatcher selected by config
    let dispatcher = whisper::notify::from_config(&config.delivery)?;

    // Create app state and router
    let state = Arc::new(AppState::new(config.clone(), stores, dispatcher));
    let app = whisper::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
