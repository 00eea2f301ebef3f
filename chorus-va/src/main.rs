//! chorus-va - Vocal Analysis service
//!
//! Scores choir members' recordings against prepared reference tracks and
//! returns pitch, timing and dynamics feedback over HTTP + SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chorus_common::config::{default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver};
use chorus_common::events::EventBus;
use chorus_va::config::VaTomlConfig;
use chorus_va::services::{separator_from_config, CoachingService, FilesystemArtifactStore};
use chorus_va::{AnalysisService, AppState};

const MODULE_NAME: &str = "chorus-va";

/// Command-line arguments for chorus-va
#[derive(Parser, Debug)]
#[command(name = "chorus-va")]
#[command(about = "Vocal analysis service for Chorus")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5760", env = "CHORUS_VA_PORT")]
    port: u16,

    /// Root folder holding the database and artifacts
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML config file (defaults to <config dir>/chorus/chorus-va.toml)
    #[arg(short, long, env = "CHORUS_VA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .or_else(|| default_config_path(MODULE_NAME))
        .unwrap_or_else(|| PathBuf::from("chorus-va.toml"));
    let config: VaTomlConfig = load_toml_config(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    let default_filter = format!(
        "chorus_va={level},chorus_common={level},tower_http={level}",
        level = config.logging.level
    );
    let file_layer = match &config.logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting chorus-va (Vocal Analysis) on port {}", args.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());

    config
        .analysis
        .validate()
        .context("Invalid analysis configuration")?;

    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_toml_root(config.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = chorus_va::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let artifacts = FilesystemArtifactStore::new(initializer.root_folder());
    artifacts
        .ensure_layout()
        .await
        .context("Failed to create artifact directories")?;

    let separator = separator_from_config(&config.analysis.isolation);
    info!(
        separator = separator.name(),
        model = %config.analysis.isolation.model_id,
        fallback = ?config.analysis.isolation.fallback,
        "Source separation configured"
    );
    let coaching = CoachingService::from_config(&config.analysis.coaching);

    let event_bus = EventBus::new(256);
    let (service, workers) = AnalysisService::start(
        db_pool.clone(),
        event_bus.clone(),
        Arc::new(artifacts),
        separator,
        coaching,
        &config.analysis,
    );

    let report = service.recover_pending().await.context("Startup recovery failed")?;
    info!(?report, "Startup recovery complete");

    let app = chorus_va::build_router(AppState::new(db_pool, event_bus, service));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    workers.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
