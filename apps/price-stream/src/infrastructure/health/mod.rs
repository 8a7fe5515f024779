//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, stream status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (stream or poller coverage)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ConnectionState;
use crate::application::services::{EngineSnapshot, EngineStats};
use crate::infrastructure::alpaca::{ConnectorSnapshot, ConnectorStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream stream status.
    pub stream: ConnectorSnapshot,
    /// Engine counters.
    pub engine: EngineSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Streaming live.
    Healthy,
    /// Stream down, reconnecting or covered by the poller.
    Degraded,
    /// Stream connector gave up.
    Unhealthy,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    connector: Arc<ConnectorStatus>,
    engine: Arc<EngineStats>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, connector: Arc<ConnectorStatus>, engine: Arc<EngineStats>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            connector,
            engine,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Bind the health port on all interfaces.
///
/// # Errors
///
/// Returns `HealthServerError::BindFailed` if the port is unavailable.
pub async fn bind(port: u16) -> Result<TcpListener, HealthServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| HealthServerError::BindFailed(port, e.to_string()))
}

/// Serve health routes until cancelled.
///
/// # Errors
///
/// Returns `HealthServerError::ServerFailed` if the HTTP server encounters
/// a fatal error while running.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Health server listening");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

    tracing::info!("Health server stopped");
    Ok(())
}

/// Health routes.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let stream = state.connector.snapshot();
    let engine = state.engine.snapshot();

    if is_ready(&stream, &engine) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stream = state.connector.snapshot();
    let engine = state.engine.snapshot();

    HealthResponse {
        status: determine_health_status(&stream),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream,
        engine,
    }
}

fn determine_health_status(stream: &ConnectorSnapshot) -> HealthStatus {
    if stream.fatal_reason.is_some() {
        HealthStatus::Unhealthy
    } else if stream.state == ConnectionState::Authenticated {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

/// Prices are flowing: either live, or nothing to cover, or the poller covers.
const fn is_ready(stream: &ConnectorSnapshot, engine: &EngineSnapshot) -> bool {
    matches!(stream.state, ConnectionState::Authenticated)
        || engine.symbols == 0
        || engine.poller_active
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
