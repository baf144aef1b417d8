//! oscillated - oscillate daemon
//!
//! Runs the audio manager against a SQLite store and serves a small HTTP
//! surface (health, Prometheus metrics, engine and guild status).
//!
//! Usage:
//!   oscillated [OPTIONS]
//!
//! Without a config file every setting uses its default; flags and
//! `OSCILLATE_*` variables override the file.

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use oscillate_core::metrics::{
    OPERATION_DURATION_BUCKETS, OPERATION_DURATION_METRIC, TRACK_DURATION_BUCKETS,
    TRACK_DURATION_METRIC,
};
use oscillate_core::{SqliteStore, StateStore};
use oscillate_player::{AudioManager, NullVoiceConnector};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{DaemonConfig, LogFormat};
use crate::server::{create_router, AppState};

const PROMETHEUS_UPKEEP: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "oscillated")]
#[command(author, version, about = "oscillate audio engine daemon")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "OSCILLATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides server.host)
    #[arg(long, env = "OSCILLATE_HOST")]
    host: Option<String>,

    /// Listen port (overrides server.port)
    #[arg(short, long, env = "OSCILLATE_PORT")]
    port: Option<u16>,

    /// SQLite database path (overrides storage.db_path)
    #[arg(long, env = "OSCILLATE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Log output format (overrides logging.format)
    #[arg(long, value_enum, env = "OSCILLATE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig::default(),
        };

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            config.storage.db_path = db_path.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(config: &DaemonConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.default_log_filter().into());

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn install_prometheus() -> Option<PrometheusHandle> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(TRACK_DURATION_METRIC.to_string()),
            &TRACK_DURATION_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Full(OPERATION_DURATION_METRIC.to_string()),
                &OPERATION_DURATION_BUCKETS,
            )
        });

    match builder.and_then(|b| b.install_recorder()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    init_tracing(&config);

    tracing::info!(version = oscillate_core::VERSION, "Starting oscillated");

    // Recorder must exist before the manager records anything
    let prometheus = install_prometheus();
    if let Some(handle) = prometheus.clone() {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROMETHEUS_UPKEEP);
            loop {
                ticker.tick().await;
                handle.run_upkeep();
            }
        });
    }

    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::new(&config.storage.db_path));
    let manager = Arc::new(
        AudioManager::new(config.manager.clone(), Arc::new(NullVoiceConnector::new()))
            .context("Failed to create audio manager")?,
    );
    manager
        .start(store.clone())
        .await
        .context("Failed to start audio manager")?;

    tracing::info!(
        db_path = %config.storage.db_path.display(),
        max_ffmpeg_procs = config.manager.max_ffmpeg_procs,
        "Audio manager started"
    );

    let app = create_router(AppState::new(manager.clone(), prometheus));

    let addr = config.listen_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Saving player state");
    manager.shutdown().await;
    if let Err(e) = store.close().await {
        tracing::warn!("Failed to close store: {}", e);
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
