//! Service Assembly
//!
//! Wires the stream connector, the engine and the HTTP servers together
//! and spawns them on the current runtime.
//!
//! ```text
//! Alpaca stream ──► StreamConnector ──UpstreamEvent──► Engine ──► Fanout ──► viewers
//!                         ▲                              │  ▲
//!                         └──────UpstreamCommand─────────┘  │
//!   viewers, FallbackPoller, SessionMonitor ──EngineCommand─┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{PriceSource, TradingCalendar};
use crate::application::services::{Engine, EngineConfig, EngineHandle, SessionClock};
use crate::infrastructure::alpaca::{ConnectorStatus, StreamConnector, StreamConnectorConfig};
use crate::infrastructure::health::{self, HealthServerState};
use crate::infrastructure::http;

/// Engine command queue depth.
pub const ENGINE_QUEUE: usize = 1024;

/// Connector event queue depth.
pub const UPSTREAM_QUEUE: usize = 1024;

/// Everything needed to start the service.
pub struct ServiceParts {
    /// Engine tuning.
    pub engine: EngineConfig,
    /// Stream connector settings.
    pub connector: StreamConnectorConfig,
    /// REST price lookups.
    pub source: Arc<dyn PriceSource>,
    /// Trading calendar.
    pub calendar: Arc<dyn TradingCalendar>,
    /// Version reported by `/health`.
    pub version: String,
}

impl std::fmt::Debug for ServiceParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceParts")
            .field("engine", &self.engine)
            .field("connector", &self.connector)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Handles to a running service.
#[derive(Debug)]
pub struct RunningService {
    /// Engine queue.
    pub engine: EngineHandle,
    /// Upstream connector status.
    pub connector: Arc<ConnectorStatus>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningService {
    /// Cancel every task and wait for them to finish, up to `timeout`.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();
        self.join(timeout).await;
    }

    /// Wait for every task to finish after cancellation, up to `timeout`.
    pub async fn join(self, timeout: Duration) {
        let all = futures::future::join_all(self.tasks);
        if tokio::time::timeout(timeout, all).await.is_err() {
            tracing::warn!(
                timeout_secs = timeout.as_secs(),
                "Tasks still running at shutdown timeout"
            );
        }
    }
}

/// Spawn the service on pre-bound listeners.
///
/// `health` is optional so tests can run without the health port.
pub fn start(
    parts: ServiceParts,
    viewer: TcpListener,
    health: Option<TcpListener>,
    cancel: CancellationToken,
) -> RunningService {
    let (engine_handle, commands_rx) = EngineHandle::channel(ENGINE_QUEUE);
    let (events_tx, events_rx) = mpsc::channel(UPSTREAM_QUEUE);
    let (upstream_tx, upstream_rx) = mpsc::unbounded_channel();

    let connector = StreamConnector::new(parts.connector);
    let connector_status = connector.status();

    let clock = Arc::new(SessionClock::new(parts.calendar));
    let engine = Engine::new(
        parts.engine,
        parts.source,
        clock,
        upstream_tx,
        &engine_handle,
        cancel.child_token(),
    );

    let mut tasks = Vec::with_capacity(4);

    tasks.push(tokio::spawn(engine.run(commands_rx, events_rx)));
    tasks.push(tokio::spawn(connector.run(
        events_tx,
        upstream_rx,
        cancel.child_token(),
    )));

    let viewer_engine = engine_handle.clone();
    let viewer_cancel = cancel.child_token();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = http::serve(viewer, viewer_engine, viewer_cancel).await {
            tracing::error!(error = %e, "Viewer server error");
        }
    }));

    if let Some(listener) = health {
        let state = Arc::new(HealthServerState::new(
            parts.version,
            Arc::clone(&connector_status),
            engine_handle.stats(),
        ));
        let health_cancel = cancel.child_token();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = health::serve(listener, state, health_cancel).await {
                tracing::error!(error = %e, "Health server error");
            }
        }));
    }

    RunningService {
        engine: engine_handle,
        connector: connector_status,
        cancel,
        tasks,
    }
}
