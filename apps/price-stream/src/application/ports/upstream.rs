//! Messages exchanged between the engine and the upstream stream connector.

use std::time::Duration;

use serde::Serialize;

use crate::domain::market_data::{PriceObservation, Symbol};

/// Upstream connection state, owned by the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Transport open, credentials not yet accepted.
    ConnectedUnauthenticated,
    /// Streaming.
    Authenticated,
    /// Waiting before the next connection attempt.
    Backoff,
}

impl ConnectionState {
    /// State name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::ConnectedUnauthenticated => "connected_unauthenticated",
            Self::Authenticated => "authenticated",
            Self::Backoff => "backoff",
        }
    }

    /// Numeric value for gauges.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::ConnectedUnauthenticated => 2.0,
            Self::Authenticated => 3.0,
            Self::Backoff => 4.0,
        }
    }
}

/// Event emitted by the connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Transport opened, authentication pending.
    Connected,
    /// Credentials accepted. `epoch` identifies this authenticated session.
    Authenticated {
        /// Session epoch; increases on every authentication.
        epoch: u64,
    },
    /// Trade or quote price.
    Observation(PriceObservation),
    /// Transport closed. The connector is no longer authenticated.
    Disconnected,
    /// Reconnect scheduled.
    Backoff {
        /// Attempt number about to be made.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Connector gave up and will not reconnect.
    Fatal {
        /// Human readable reason.
        reason: String,
    },
}

/// Subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamAction {
    /// Start streaming trades and quotes.
    Subscribe,
    /// Stop streaming trades and quotes.
    Unsubscribe,
}

/// Subscription command for the connector.
///
/// Commands carry the epoch they were issued for. The connector drops
/// commands whose epoch is not its current authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCommand {
    /// Authenticated session the command targets.
    pub epoch: u64,
    /// Action.
    pub action: UpstreamAction,
    /// Symbols.
    pub symbols: Vec<Symbol>,
}

impl UpstreamCommand {
    /// Subscribe command.
    #[must_use]
    pub const fn subscribe(epoch: u64, symbols: Vec<Symbol>) -> Self {
        Self {
            epoch,
            action: UpstreamAction::Subscribe,
            symbols,
        }
    }

    /// Unsubscribe command.
    #[must_use]
    pub const fn unsubscribe(epoch: u64, symbols: Vec<Symbol>) -> Self {
        Self {
            epoch,
            action: UpstreamAction::Unsubscribe,
            symbols,
        }
    }
}
