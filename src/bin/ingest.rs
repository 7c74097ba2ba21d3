//! Metric ingest service
//!
//! Consumes metric messages from Kafka, feeds the series store and keeps the
//! definition index in Elasticsearch up to date.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with consumer state
//! - `GET /metrics` - Prometheus metrics
//!
//! # CLI Commands
//!
//! - `start` - Start consuming (default if no command specified)
//! - `check-config` - Validate configuration file
//!
//! # Configuration
//!
//! The service reads configuration from:
//! 1. `--config` or the `INGEST_CONFIG` environment variable (path to TOML file)
//! 2. `./ingest.toml` in current directory
//! 3. Default configuration
//!
//! `INGEST_*` environment variables override file values.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::{Parser, Subcommand};
use metric_ingest::{
    config::Config,
    engine::{DefinitionSink, MemorySeriesStore, MemoryUsage, UsageTracker},
    index::{defcache::DefCache, DefinitionIndex},
    input::{Consumer, ConsumerState, KafkaTransport},
    metrics::{gather_text, InputMetrics},
    Error,
};
use prometheus::Registry;
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{debug, info, warn};

// =============================================================================
// CLI Definition
// =============================================================================

/// Metric ingest - Kafka to series store and definition index
#[derive(Parser)]
#[command(name = "ingest")]
#[command(version)]
#[command(about = "Real-time metric ingestion from Kafka", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Override Kafka brokers (comma separated)
    #[arg(short, long, global = true)]
    brokers: Option<String>,

    /// Override Kafka topic
    #[arg(short, long, global = true)]
    topic: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start consuming (default)
    Start,

    /// Validate configuration file without starting
    CheckConfig,
}

/// Load the configuration file, environment overrides and CLI overrides
fn load_config(cli: &Cli) -> metric_ingest::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file_with_env(&path.to_string_lossy()),
        None if std::path::Path::new("ingest.toml").exists() => {
            Config::from_file_with_env("ingest.toml")
        },
        None => Ok(Config::from_env()),
    }
    .map_err(Error::Configuration)?;

    if let Some(brokers) = &cli.brokers {
        config.kafka.brokers = brokers.split(',').map(|b| b.trim().to_string()).collect();
    }
    if let Some(topic) = &cli.topic {
        config.kafka.topic = topic.clone();
    }

    config.validate().map_err(Error::Configuration)?;
    Ok(config)
}

// =============================================================================
// HTTP endpoints
// =============================================================================

struct AppState {
    registry: Registry,
    consumer: Arc<Consumer<KafkaTransport>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    consumer: String,
    version: &'static str,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let consumer = state.consumer.state();
    let (code, status) = match consumer {
        ConsumerState::Running => (StatusCode::OK, "healthy"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    };
    (
        code,
        Json(HealthResponse {
            status,
            consumer: consumer.to_string(),
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match gather_text(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler installation failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping consumer");
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    println!("Configuration is valid!");
    println!();
    println!("Kafka:");
    println!("  Brokers: {}", config.kafka.brokers.join(","));
    println!("  Topic: {}", config.kafka.topic);
    println!("  Group: {}", config.kafka.group_id);
    println!();
    println!("Definition index:");
    println!("  Address: {}", config.index.addr);
    println!("  Index: {}", config.index.index_name);
    println!(
        "  Auth: {}",
        !config.index.user.is_empty() && !config.index.pass.expose_secret().is_empty()
    );
    println!(
        "  Warmup: {}% for {}s",
        config.index.warmup_percent, config.index.warmup_window_secs
    );
    println!();
    println!("Ingest:");
    println!("  Usage accounting: {}", config.ingest.usage_enabled);
    println!("  Definition cache: {}", config.ingest.defcache_enabled);
    println!();
    println!("Monitoring:");
    println!("  Listen address: {}", config.monitoring.listen_addr);
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

async fn cmd_start(config: Config) -> metric_ingest::Result<()> {
    info!("Starting metric ingest v{}", env!("CARGO_PKG_VERSION"));
    debug!(?config, "configuration");

    let registry = Registry::new();

    let index = Arc::new(
        DefinitionIndex::connect(config.index.to_index_config(), &registry).await?,
    );
    let defs: Arc<dyn DefinitionSink> = if config.ingest.defcache_enabled {
        Arc::new(DefCache::new(
            Arc::clone(&index),
            Duration::from_secs(config.ingest.defcache_refresh_secs),
        ))
    } else {
        index.clone()
    };

    let store = Arc::new(MemorySeriesStore::new());
    let usage: Option<Arc<dyn UsageTracker>> = if config.ingest.usage_enabled {
        Some(Arc::new(MemoryUsage::new()))
    } else {
        None
    };

    let transport = KafkaTransport::new(&config.kafka.to_kafka_config())?;
    let consumer = Arc::new(Consumer::new(transport));
    consumer.start(store, defs, usage, InputMetrics::new("kafka", &registry)?)?;

    let state = Arc::new(AppState {
        registry,
        consumer: Arc::clone(&consumer),
    });
    let addr: SocketAddr = config
        .monitoring
        .listen_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("invalid listen_addr: {}", e)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Monitoring listening on http://{}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    consumer.stop()?.wait().await;
    index.stop().await;

    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::CheckConfig) = &cli.command {
        return cmd_check_config(&cli);
    }

    let config = load_config(&cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    cmd_start(config).await?;
    Ok(())
}
