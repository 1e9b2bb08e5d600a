//! Rate Aggregator Binary
//!
//! Starts crypto price ingestion and hourly average persistence.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin rate-aggregator
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FINNHUB_API_KEY`: Finnhub API token
//!
//! ## Optional
//! - `FINNHUB_WS_URL`: Feed endpoint (default: wss://ws.finnhub.io)
//! - `RATE_SYMBOLS`: Comma-separated symbols (default: BINANCE:ETHUSDC,BINANCE:ETHUSDT,BINANCE:ETHBTC)
//! - `RATE_DATABASE_PATH`: SQLite file (default: rates.db)
//! - `RATE_RETENTION_DAYS`: Days of hourly averages kept (default: 7)
//! - `METRICS_PORT`: Prometheus metrics port, 0 for no listener (default: 9090)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rate_aggregator::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
use rate_aggregator::infrastructure::config::redact_url;
use rate_aggregator::infrastructure::telemetry;
use rate_aggregator::{
    RateAggregatorConfig, RateAggregatorRuntime, RuntimeSettings, SqliteRateStore, init_metrics,
};
use tokio::signal;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let dotenv_path = load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        dotenv = ?dotenv_path,
        span_export = telemetry_guard.is_exporting(),
        "Starting rate aggregator"
    );

    let config = RateAggregatorConfig::from_env()?;
    log_config(&config);

    init_metrics(config.server.metrics_port)?;

    let store = Arc::new(
        SqliteRateStore::open(&config.storage.database_path).with_context(|| {
            format!(
                "failed to open rate store at {}",
                config.storage.database_path.display()
            )
        })?,
    );

    let hub = Arc::new(BroadcastHub::new(
        BroadcastConfig::from(&config.broadcast),
        store.clone(),
    ));

    let runtime = RateAggregatorRuntime::new(RuntimeSettings::from_config(&config), store, hub);
    runtime.start();

    tracing::info!("Rate aggregator ready");

    await_shutdown().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, runtime.stop())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Graceful shutdown timed out"
        );
    }

    tracing::info!("Rate aggregator stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RateAggregatorConfig) {
    tracing::info!(
        symbols = ?config.feed.symbols,
        database = %config.storage.database_path.display(),
        retention_days = config.aggregation.retention_days,
        metrics_port = config.server.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %redact_url(&config.stream_url()),
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        "Feed endpoint"
    );
}

/// Load `.env` from the working directory or the nearest ancestor that has
/// one. Variables already set in the environment win.
fn load_dotenv() -> Option<std::path::PathBuf> {
    dotenvy::dotenv().ok()
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
