//! Stock Stream Connector
//!
//! Owns the single upstream WebSocket connection to Alpaca's stock stream.
//!
//! # Lifecycle
//!
//! 1. Connect, wait for `connected`, send credentials
//! 2. On `authenticated`, start a new epoch and report it to the engine
//! 3. Forward trades and quotes as price observations
//! 4. On close, report the loss and reconnect on the fixed schedule
//!
//! Subscription commands arrive tagged with the epoch they were issued for.
//! Commands for any other epoch, or received while unauthenticated, are
//! dropped: the engine replays the full symbol set on every authentication.
//!
//! # Error Codes
//!
//! - 402: credentials rejected, give up without retrying
//! - 406: connection limit, retry after the connection-limit delay without
//!   consuming a reconnect attempt
//! - anything else: logged

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, AuthHandler};
use super::codec::{CodecError, JsonCodec};
use super::messages::{ErrorMessage, StreamMessage, SubscriptionRequest};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{ConnectionState, UpstreamAction, UpstreamCommand, UpstreamEvent};
use crate::domain::market_data::{PriceObservation, normalize_symbol};
use crate::infrastructure::config::{Credentials, StreamConfig};
use crate::infrastructure::metrics::{self, MessageType};

// =============================================================================
// Error Type
// =============================================================================

/// Reasons a stream session ended.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Server rejected the credentials.
    #[error("authentication rejected: {0}")]
    Rejected(AuthError),

    /// Server reported too many concurrent connections.
    #[error("connection limit exceeded")]
    ConnectionLimit,

    /// Server closed the connection.
    #[error("connection closed")]
    Closed,

    /// Engine side of a channel was dropped.
    #[error("engine channel closed")]
    EngineGone,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the stream connector.
#[derive(Debug, Clone)]
pub struct StreamConnectorConfig {
    /// WebSocket URL.
    pub url: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Reconnection schedule.
    pub reconnect: ReconnectConfig,
    /// Delay after a connection limit error.
    pub connection_limit_delay: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl StreamConnectorConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            url: url.into(),
            credentials,
            reconnect: ReconnectConfig::default(),
            connection_limit_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Derive from the service configuration.
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            url: config.endpoints.stream_url.clone(),
            credentials: config.credentials.clone(),
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
            connection_limit_delay: config.reconnect.connection_limit_delay,
            connect_timeout: config.reconnect.connect_timeout,
        }
    }
}

// =============================================================================
// Connector Status
// =============================================================================

/// Point-in-time connector health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectorSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Consecutive reconnect attempts since the last authentication.
    pub reconnect_attempts: u32,
    /// Current or most recent authenticated epoch (0 = never).
    pub epoch: u64,
    /// Most recent session error.
    pub last_error: Option<String>,
    /// Set once the connector has given up.
    pub fatal_reason: Option<String>,
}

/// Connector status shared with the health server.
#[derive(Debug, Default)]
pub struct ConnectorStatus {
    inner: RwLock<ConnectorSnapshot>,
}

impl ConnectorStatus {
    /// Create a disconnected status.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> ConnectorSnapshot {
        self.inner.read().clone()
    }

    /// Whether the connector is streaming.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.read().state == ConnectionState::Authenticated
    }

    /// Whether the connector has given up.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.inner.read().fatal_reason.is_some()
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.write().state = state;
        metrics::set_connection_state(state);
    }

    fn set_authenticated(&self, epoch: u64) {
        {
            let mut inner = self.inner.write();
            inner.state = ConnectionState::Authenticated;
            inner.epoch = epoch;
            inner.reconnect_attempts = 0;
        }
        metrics::set_connection_state(ConnectionState::Authenticated);
    }

    fn set_backoff(&self, attempts: u32) {
        {
            let mut inner = self.inner.write();
            inner.state = ConnectionState::Backoff;
            inner.reconnect_attempts = attempts;
        }
        metrics::set_connection_state(ConnectionState::Backoff);
    }

    fn record_error(&self, error: &StreamError) {
        self.inner.write().last_error = Some(error.to_string());
    }

    fn set_fatal(&self, reason: &str) {
        {
            let mut inner = self.inner.write();
            inner.state = ConnectionState::Disconnected;
            inner.fatal_reason = Some(reason.to_string());
        }
        metrics::set_connection_state(ConnectionState::Disconnected);
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Upstream stock stream connector.
#[derive(Debug)]
pub struct StreamConnector {
    config: StreamConnectorConfig,
    codec: JsonCodec,
    policy: ReconnectPolicy,
    status: Arc<ConnectorStatus>,
    epoch: u64,
}

impl StreamConnector {
    /// Create a new connector.
    #[must_use]
    pub fn new(config: StreamConnectorConfig) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            config,
            codec: JsonCodec::new(),
            policy,
            status: Arc::new(ConnectorStatus::new()),
            epoch: 0,
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<ConnectorStatus> {
        Arc::clone(&self.status)
    }

    /// Run until cancelled, the engine goes away, or the connector gives up.
    pub async fn run(
        mut self,
        events: mpsc::Sender<UpstreamEvent>,
        mut commands: mpsc::UnboundedReceiver<UpstreamCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let error = match self.connect_and_run(&events, &mut commands, &cancel).await {
                Ok(()) | Err(StreamError::EngineGone) => break,
                Err(error) => error,
            };

            tracing::warn!(error = %error, epoch = self.epoch, "Stock stream session ended");
            self.status.record_error(&error);
            if events.send(UpstreamEvent::Disconnected).await.is_err() {
                break;
            }

            let delay = match &error {
                StreamError::Rejected(AuthError::InvalidCredentials) => {
                    self.give_up(&events, error.to_string()).await;
                    return;
                }
                StreamError::ConnectionLimit => self.config.connection_limit_delay,
                _ => {
                    if let Some(delay) = self.policy.next_delay() {
                        delay
                    } else {
                        let reason = format!(
                            "gave up after {} reconnect attempts: {error}",
                            self.policy.attempt_count()
                        );
                        self.give_up(&events, reason).await;
                        return;
                    }
                }
            };

            let attempt = self.policy.attempt_count();
            metrics::record_reconnect();
            self.status.set_backoff(attempt);
            tracing::info!(
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_secs = delay.as_secs(),
                "Reconnecting to stock stream"
            );
            if events
                .send(UpstreamEvent::Backoff { attempt, delay })
                .await
                .is_err()
            {
                break;
            }

            if !Self::wait(delay, &mut commands, &cancel).await {
                break;
            }
        }

        self.status.set_state(ConnectionState::Disconnected);
        tracing::info!("Stock stream connector stopped");
    }

    /// Sleep through a backoff delay, discarding commands meant for the
    /// closed session. Returns `false` when the connector should stop.
    async fn wait(
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<UpstreamCommand>,
        cancel: &CancellationToken,
    ) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = &mut sleep => return true,
                cmd = commands.recv() => {
                    if cmd.is_none() {
                        return false;
                    }
                }
            }
        }
    }

    async fn give_up(&self, events: &mpsc::Sender<UpstreamEvent>, reason: String) {
        tracing::error!(reason = %reason, "Stock stream connector giving up");
        self.status.set_fatal(&reason);
        let _ = events.send(UpstreamEvent::Fatal { reason }).await;
    }

    async fn connect_and_run(
        &mut self,
        events: &mpsc::Sender<UpstreamEvent>,
        commands: &mut mpsc::UnboundedReceiver<UpstreamCommand>,
        cancel: &CancellationToken,
    ) -> Result<(), StreamError> {
        self.status.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.config.url, "Connecting to stock stream");

        let timeout = self.config.connect_timeout;
        let connect = tokio_tungstenite::connect_async(self.config.url.as_str());
        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio::time::timeout(timeout, connect) => {
                result.map_err(|_| StreamError::ConnectTimeout(timeout))??
            }
        };

        self.status.set_state(ConnectionState::ConnectedUnauthenticated);
        emit(events, UpstreamEvent::Connected).await?;

        let (mut write, mut read) = ws_stream.split();
        let mut auth = AuthHandler::new(self.config.credentials.clone());

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        return Err(StreamError::EngineGone);
                    };
                    if let Some(request) = self.request_for(&cmd, auth.is_authenticated()) {
                        tracing::debug!(
                            action = request.action,
                            symbols = ?request.trades,
                            epoch = cmd.epoch,
                            "Sending subscription request"
                        );
                        let json = self.codec.encode(&request)?;
                        write.send(Message::Text(json.into())).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text(&text, &mut auth, &mut write, events).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Server sent close frame");
                            return Err(StreamError::Closed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(StreamError::Closed),
                    }
                }
            }
        }
    }

    /// Subscription frame for a command, if it targets the live session.
    fn request_for(
        &self,
        cmd: &UpstreamCommand,
        authenticated: bool,
    ) -> Option<SubscriptionRequest> {
        if !authenticated || cmd.epoch != self.epoch {
            tracing::debug!(
                command_epoch = cmd.epoch,
                epoch = self.epoch,
                authenticated,
                "Dropping stale subscription command"
            );
            return None;
        }
        if cmd.symbols.is_empty() {
            return None;
        }

        let symbols = cmd.symbols.clone();
        Some(match cmd.action {
            UpstreamAction::Subscribe => SubscriptionRequest::subscribe(symbols),
            UpstreamAction::Unsubscribe => SubscriptionRequest::unsubscribe(symbols),
        })
    }

    async fn handle_text<W>(
        &mut self,
        text: &str,
        auth: &mut AuthHandler,
        write: &mut W,
        events: &mpsc::Sender<UpstreamEvent>,
    ) -> Result<(), StreamError>
    where
        W: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                metrics::record_parse_error();
                tracing::warn!(error = %e, "Dropping malformed upstream frame");
                return Ok(());
            }
        };

        for e in &frame.rejected {
            metrics::record_parse_error();
            tracing::warn!(error = %e, "Dropping malformed upstream message");
        }

        let received_at = Utc::now();

        for message in frame.messages {
            match message {
                StreamMessage::Success(success) => {
                    metrics::record_upstream_message(MessageType::Control);
                    let newly_authenticated = auth.on_success(&success);

                    if auth.state().can_authenticate() {
                        let request = auth.create_auth_request();
                        let json = self.codec.encode(&request)?;
                        write.send(Message::Text(json.into())).await?;
                        tracing::debug!("Sent authentication request");
                    } else if newly_authenticated {
                        self.epoch += 1;
                        self.policy.reset();
                        self.status.set_authenticated(self.epoch);
                        tracing::info!(epoch = self.epoch, "Stock stream authenticated");
                        emit(events, UpstreamEvent::Authenticated { epoch: self.epoch }).await?;
                    }
                }
                StreamMessage::Error(err) => {
                    metrics::record_upstream_message(MessageType::Error);
                    let auth_error = auth.on_error(&err);

                    if err.code == ErrorMessage::AUTH_FAILED {
                        return Err(StreamError::Rejected(auth_error));
                    }
                    if err.is_connection_limit() {
                        return Err(StreamError::ConnectionLimit);
                    }
                    tracing::warn!(code = err.code, msg = %err.msg, "Upstream error");
                }
                StreamMessage::Subscription(sub) => {
                    metrics::record_upstream_message(MessageType::Control);
                    tracing::debug!(
                        trades = ?sub.trades,
                        quotes = ?sub.quotes,
                        "Upstream subscription confirmed"
                    );
                }
                StreamMessage::Trade(trade) => {
                    metrics::record_upstream_message(MessageType::Trade);
                    let Some(symbol) = normalize_symbol(&trade.symbol) else {
                        continue;
                    };
                    if trade.price > Decimal::ZERO {
                        let observation = PriceObservation::trade(symbol, trade.price, received_at);
                        emit(events, UpstreamEvent::Observation(observation)).await?;
                    } else {
                        tracing::debug!(symbol = %symbol, price = %trade.price, "Non-positive trade dropped");
                    }
                }
                StreamMessage::Quote(quote) => {
                    metrics::record_upstream_message(MessageType::Quote);
                    if let (Some(symbol), Some(price)) =
                        (normalize_symbol(&quote.symbol), quote.price())
                    {
                        let observation = PriceObservation::quote(symbol, price, received_at);
                        emit(events, UpstreamEvent::Observation(observation)).await?;
                    }
                }
                StreamMessage::Unknown(kind) => {
                    metrics::record_upstream_message(MessageType::Unknown);
                    tracing::trace!(kind = %kind, "Ignoring upstream message");
                }
            }
        }

        Ok(())
    }
}

async fn emit(events: &mpsc::Sender<UpstreamEvent>, event: UpstreamEvent) -> Result<(), StreamError> {
    events.send(event).await.map_err(|_| StreamError::EngineGone)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> StreamConnector {
        StreamConnector::new(StreamConnectorConfig::new(
            "ws://127.0.0.1:1",
            Credentials::new("key".to_string(), "secret".to_string()),
        ))
    }

    #[test]
    fn commands_require_live_epoch() {
        let mut connector = connector();
        connector.epoch = 2;

        let current = UpstreamCommand::subscribe(2, vec!["AAPL".to_string()]);
        let stale = UpstreamCommand::subscribe(1, vec!["AAPL".to_string()]);

        assert_eq!(
            connector.request_for(&current, true),
            Some(SubscriptionRequest::subscribe(vec!["AAPL".to_string()]))
        );
        assert_eq!(connector.request_for(&stale, true), None);
        assert_eq!(connector.request_for(&current, false), None);
    }

    #[test]
    fn unsubscribe_and_empty_commands() {
        let mut connector = connector();
        connector.epoch = 1;

        let unsubscribe = UpstreamCommand::unsubscribe(1, vec!["MSFT".to_string()]);
        let request = connector.request_for(&unsubscribe, true).unwrap();
        assert_eq!(request.action, "unsubscribe");

        let empty = UpstreamCommand::subscribe(1, Vec::new());
        assert_eq!(connector.request_for(&empty, true), None);
    }

    #[test]
    fn status_transitions() {
        let status = ConnectorStatus::new();
        assert_eq!(status.snapshot(), ConnectorSnapshot::default());

        status.set_backoff(3);
        assert_eq!(status.snapshot().reconnect_attempts, 3);
        assert_eq!(status.snapshot().state, ConnectionState::Backoff);

        status.set_authenticated(4);
        let snapshot = status.snapshot();
        assert!(status.is_authenticated());
        assert_eq!(snapshot.epoch, 4);
        assert_eq!(snapshot.reconnect_attempts, 0);

        status.set_fatal("credentials rejected");
        assert!(status.is_fatal());
        assert!(!status.is_authenticated());
    }

    #[tokio::test]
    async fn gives_up_when_attempts_exhausted() {
        let mut config = StreamConnectorConfig::new(
            "ws://127.0.0.1:1",
            Credentials::new("key".to_string(), "secret".to_string()),
        );
        config.reconnect = ReconnectConfig::fixed(Duration::from_millis(1), 2);
        config.connect_timeout = Duration::from_millis(200);

        let connector = StreamConnector::new(config);
        let status = connector.status();
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (_commands_tx, commands_rx) = mpsc::unbounded_channel();

        connector
            .run(events_tx, commands_rx, CancellationToken::new())
            .await;

        let mut backoffs = 0;
        let mut fatal = false;
        while let Ok(event) = events_rx.try_recv() {
            match event {
                UpstreamEvent::Backoff { .. } => backoffs += 1,
                UpstreamEvent::Fatal { .. } => fatal = true,
                _ => {}
            }
        }
        assert_eq!(backoffs, 2);
        assert!(fatal);
        assert!(status.is_fatal());
    }
}
