//! Viewer HTTP Server
//!
//! # Endpoints
//!
//! - `GET /ws` - Viewer WebSocket (subscribe/unsubscribe in, price events out)
//! - `GET /prices/{symbol}` - Current price from cache or a REST lookup
//!
//! Each WebSocket gets a writer task draining its outbound queue and a
//! reader task forwarding requests to the engine. When either finishes,
//! the other is aborted and the viewer is deregistered.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::services::EngineHandle;
use crate::domain::events::ClientRequest;
use crate::domain::market_data::normalize_symbol;
use crate::domain::subscription::ClientId;
use crate::infrastructure::broadcast::client_channel;

// =============================================================================
// Server
// =============================================================================

/// Bind the viewer port on all interfaces.
///
/// # Errors
///
/// Returns `HttpServerError::BindFailed` if the port is unavailable.
pub async fn bind(port: u16) -> Result<TcpListener, HttpServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| HttpServerError::BindFailed(port, e.to_string()))
}

/// Serve viewer routes on an already bound listener.
///
/// # Errors
///
/// Returns `HttpServerError::ServerFailed` if the server stops with an error.
pub async fn serve(
    listener: TcpListener,
    engine: EngineHandle,
    cancel: CancellationToken,
) -> Result<(), HttpServerError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "Viewer server listening");
    }

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

    tracing::info!("Viewer server stopped");
    Ok(())
}

/// Viewer routes.
pub fn router(engine: EngineHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/prices/{symbol}", get(price_handler))
        .with_state(engine)
}

// =============================================================================
// Handlers
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(engine): State<EngineHandle>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, engine))
}

/// `GET /prices/{symbol}` response body.
#[derive(Debug, Serialize)]
struct PriceResponse {
    symbol: String,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
}

async fn price_handler(
    Path(symbol): Path<String>,
    State(engine): State<EngineHandle>,
) -> Response {
    let Some(symbol) = normalize_symbol(&symbol) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match engine.query_price(&symbol).await {
        Ok(Some(price)) => Json(PriceResponse { symbol, price }).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "price not found").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

// =============================================================================
// WebSocket Session
// =============================================================================

fn new_client_id() -> (ClientId, Uuid) {
    let id = Uuid::new_v4();
    (id.as_u64_pair().0, id)
}

async fn handle_socket(socket: WebSocket, engine: EngineHandle) {
    let (client, session) = new_client_id();
    let (tx, mut rx) = client_channel();

    if engine.connect(client, tx).await.is_err() {
        tracing::warn!(session = %session, "Engine stopped, refusing viewer");
        return;
    }
    tracing::info!(client, session = %session, "Viewer connected");

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_engine = engine.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };

            let sent = match ClientRequest::parse(&text) {
                Ok(ClientRequest::Subscribe { symbol }) => {
                    reader_engine.subscribe(client, symbol).await
                }
                Ok(ClientRequest::Unsubscribe { symbol }) => {
                    reader_engine.unsubscribe(client, symbol).await
                }
                Err(e) => {
                    tracing::debug!(client, error = %e, "Ignoring unparseable viewer message");
                    Ok(())
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    let _ = engine.disconnect(client).await;
    tracing::info!(client, session = %session, "Viewer disconnected");
}

// =============================================================================
// Errors
// =============================================================================

/// Viewer server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_response_is_numeric() {
        let body = PriceResponse {
            symbol: "AAPL".to_string(),
            price: Decimal::new(18725, 2),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"symbol":"AAPL","price":187.25}"#
        );
    }

    #[test]
    fn client_ids_differ() {
        let (a, _) = new_client_id();
        let (b, _) = new_client_id();
        assert_ne!(a, b);
    }
}
