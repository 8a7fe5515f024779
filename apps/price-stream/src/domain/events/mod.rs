//! Downstream Wire Events
//!
//! JSON messages exchanged with viewer connections.
//!
//! # Inbound
//! ```json
//! {"type": "subscribe", "symbol": "AAPL"}
//! {"type": "unsubscribe", "symbol": "AAPL"}
//! ```
//!
//! # Outbound
//! ```json
//! {"type": "price", "symbol": "AAPL", "price": 187.2, "currency": "USD", ...}
//! {"type": "market-status", "data": {"status": "open", ...}, "timestamp": 1760000000000}
//! {"type": "market-update", "data": [{"symbol": "AAPL", "price": 187.2, ...}]}
//! ```
//!
//! Timestamps are Unix epoch milliseconds. Prices are JSON numbers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::exchange::Exchange;
use super::session::{MarketState, SessionStatus};

// =============================================================================
// Inbound
// =============================================================================

/// Request sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientRequest {
    /// Start receiving prices for a symbol.
    Subscribe {
        /// Symbol of interest.
        symbol: String,
    },
    /// Stop receiving prices for a symbol.
    Unsubscribe {
        /// Symbol no longer of interest.
        symbol: String,
    },
}

impl ClientRequest {
    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed or unknown requests.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Outbound
// =============================================================================

/// Event broadcast to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Single validated price change.
    Price(PriceUpdate),
    /// Global session status change.
    MarketStatus(MarketStatusEvent),
    /// Snapshot of cached prices.
    MarketUpdate(MarketUpdateEvent),
}

impl ServerEvent {
    /// Event name used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Price(_) => "price",
            Self::MarketStatus(_) => "market-status",
            Self::MarketUpdate(_) => "market-update",
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Price change for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Symbol.
    pub symbol: String,
    /// New canonical price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// ISO currency code.
    pub currency: String,
    /// Currency display symbol.
    pub currency_symbol: String,
    /// Session phase of the symbol's venue.
    pub market_state: MarketState,
    /// Session message of the symbol's venue.
    pub market_message: String,
    /// Next open of the symbol's venue.
    pub next_open: Option<DateTime<Utc>>,
    /// Next close of the symbol's venue.
    pub next_close: Option<DateTime<Utc>>,
    /// Event time, epoch milliseconds.
    pub timestamp: i64,
}

impl PriceUpdate {
    /// Build an update enriched with venue metadata and session status.
    #[must_use]
    pub fn new(
        symbol: &str,
        price: Decimal,
        exchange: &Exchange,
        session: SessionStatus,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            currency: exchange.currency.to_string(),
            currency_symbol: exchange.currency_symbol.to_string(),
            market_state: session.status,
            market_message: session.message,
            next_open: session.next_open,
            next_close: session.next_close,
            timestamp: at.timestamp_millis(),
        }
    }
}

/// Global session status broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketStatusEvent {
    /// Status payload.
    pub data: SessionStatus,
    /// Event time, epoch milliseconds.
    pub timestamp: i64,
}

impl MarketStatusEvent {
    /// Wrap a status observed at `at`.
    #[must_use]
    pub fn new(data: SessionStatus, at: DateTime<Utc>) -> Self {
        Self {
            data,
            timestamp: at.timestamp_millis(),
        }
    }
}

/// Snapshot of every cached price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketUpdateEvent {
    /// One entry per cached symbol.
    pub data: Vec<PriceSnapshot>,
}

/// Cached price entry in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    /// Symbol.
    pub symbol: String,
    /// Cached price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// ISO currency code.
    pub currency: String,
    /// Currency display symbol.
    pub currency_symbol: String,
}

impl PriceSnapshot {
    /// Build a snapshot entry.
    #[must_use]
    pub fn new(symbol: &str, price: Decimal, exchange: &Exchange) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            currency: exchange.currency.to_string(),
            currency_symbol: exchange.currency_symbol.to_string(),
        }
    }
}
