//! Price Stream Binary
//!
//! Starts the real-time price distribution service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_KEY`: Alpaca API key
//! - `ALPACA_SECRET`: Alpaca API secret
//!
//! ## Optional
//! - `CREAM_ENV`: PAPER | LIVE (default: PAPER)
//! - `ALPACA_FEED`: Market data feed - "sip" | "iex" (default: sip)
//! - `PRICE_STREAM_PORT`: Viewer HTTP/WebSocket port (default: 8090)
//! - `PRICE_STREAM_HEALTH_PORT`: Health and metrics port (default: 8091)
//! - `PRICE_STREAM_POLL_INTERVAL_MS`: Fallback poll interval (default: 1000)
//! - `PRICE_STREAM_SESSION_INTERVAL_SECS`: Session broadcast interval (default: 120)
//! - `OTEL_ENABLED`: Enable OpenTelemetry span export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: cream-price-stream)
//! - `RUST_LOG`: Log filter (default: `price_stream=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_stream::infrastructure::alpaca::{AlpacaRestClient, StreamConnectorConfig};
use price_stream::infrastructure::{health, http, telemetry};
use price_stream::{ServiceParts, StreamConfig, init_metrics, start};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting price stream");

    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env().context("loading configuration")?;
    log_config(&config);

    let rest = Arc::new(AlpacaRestClient::from_config(&config).context("building REST client")?);

    let viewer = http::bind(config.server.port)
        .await
        .context("binding viewer port")?;
    let health = health::bind(config.server.health_port)
        .await
        .context("binding health port")?;

    let parts = ServiceParts {
        engine: config.engine_config(),
        connector: StreamConnectorConfig::from_config(&config),
        source: Arc::clone(&rest) as _,
        calendar: rest,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let shutdown_token = CancellationToken::new();
    let service = start(parts, viewer, Some(health), shutdown_token.clone());

    tracing::info!("Price stream ready");

    await_shutdown().await?;

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    service.shutdown(SHUTDOWN_TIMEOUT).await;

    tracing::info!("Price stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        feed = config.feed.as_str(),
        port = config.server.port,
        health_port = config.server.health_port,
        poll_interval_ms = u64::try_from(config.intervals.poll.as_millis()).unwrap_or(u64::MAX),
        session_interval_secs = config.intervals.session.as_secs(),
        max_reconnect_attempts = config.reconnect.max_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.endpoints.stream_url,
        data_url = %config.endpoints.data_url,
        trading_url = %config.endpoints.trading_url,
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    #[cfg(unix)]
    let terminated = terminate.recv();

    #[cfg(not(unix))]
    let terminated = std::future::pending::<Option<()>>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("waiting for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminated => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    Ok(())
}
