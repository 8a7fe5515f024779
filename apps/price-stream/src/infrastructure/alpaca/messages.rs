//! Alpaca WebSocket Message Types
//!
//! Wire format types for Alpaca's stock market data stream.
//!
//! # Message Types
//!
//! ## Control Messages
//! - `Success`: Connection acknowledgment or authentication success
//! - `Error`: Error response with code and message
//! - `Subscription`: Subscription confirmation
//!
//! ## Market Data
//! - `Quote`: Top-of-book quote
//! - `Trade`: Executed trade
//!
//! Only the fields the distribution engine reads are required. Everything
//! else is optional so that IEX frames (which omit some SIP fields) decode.
//!
//! # References
//!
//! - [Stock Streaming](https://docs.alpaca.markets/docs/real-time-stock-pricing-data)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Control Messages
// =============================================================================

/// Success message indicating connection or authentication succeeded.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "success", "msg": "connected"}
/// {"T": "success", "msg": "authenticated"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessMessage {
    /// Message type (always "success")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Success message: "connected" or "authenticated"
    pub msg: SuccessKind,
}

/// Kind of success message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessKind {
    /// Initial connection established
    Connected,
    /// Authentication successful
    Authenticated,
    /// Anything else the server reports as success
    #[serde(other)]
    Other,
}

/// Error message with code and description.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "error", "code": 402, "msg": "auth failed"}
/// ```
///
/// # Error Codes
/// - 400: Invalid syntax
/// - 401: Not authenticated
/// - 402: Auth failed
/// - 403: Already authenticated
/// - 404: Auth timeout
/// - 405: Symbol limit exceeded
/// - 406: Connection limit exceeded
/// - 407: Slow client
/// - 408: Insufficient subscription
/// - 409: Not allowed (internal)
/// - 500: Internal error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Message type (always "error")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Error code
    pub code: i32,

    /// Error message
    #[serde(default)]
    pub msg: String,
}

impl ErrorMessage {
    /// Credentials were rejected.
    pub const AUTH_FAILED: i32 = 402;

    /// Too many concurrent connections for this account.
    pub const CONNECTION_LIMIT: i32 = 406;

    /// Check if this is an authentication error.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self.code, 401..=404)
    }

    /// Check if this is the connection limit error.
    #[must_use]
    pub const fn is_connection_limit(&self) -> bool {
        self.code == Self::CONNECTION_LIMIT
    }
}

/// Subscription confirmation message.
///
/// Sent after a subscribe/unsubscribe action with the full active set.
///
/// # Wire Format (JSON)
/// ```json
/// {"T": "subscription", "trades": ["AAPL"], "quotes": ["AAPL", "MSFT"]}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionMessage {
    /// Message type (always "subscription")
    #[serde(rename = "T")]
    pub msg_type: String,

    /// Subscribed trade symbols
    #[serde(default)]
    pub trades: Vec<String>,

    /// Subscribed quote symbols
    #[serde(default)]
    pub quotes: Vec<String>,
}

// =============================================================================
// Market Data Messages
// =============================================================================

/// Real-time stock quote.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "q",
///   "S": "AMD",
///   "bx": "U",
///   "bp": 87.66,
///   "bs": 1,
///   "ax": "Q",
///   "ap": 87.68,
///   "as": 4,
///   "t": "2021-02-22T15:51:45.335689322Z",
///   "c": ["R"],
///   "z": "C"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuoteMessage {
    /// Ticker symbol (e.g., "AAPL")
    #[serde(rename = "S")]
    pub symbol: String,

    /// Bid price
    #[serde(rename = "bp", default)]
    pub bid_price: Option<Decimal>,

    /// Bid size in round lots
    #[serde(rename = "bs", default)]
    pub bid_size: Option<i64>,

    /// Ask price
    #[serde(rename = "ap", default)]
    pub ask_price: Option<Decimal>,

    /// Ask size in round lots
    #[serde(rename = "as", default)]
    pub ask_size: Option<i64>,

    /// Exchange timestamp
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl StockQuoteMessage {
    /// Price used for this quote: the ask when positive, otherwise the bid.
    #[must_use]
    pub fn price(&self) -> Option<Decimal> {
        let positive = |p: &Decimal| *p > Decimal::ZERO;
        self.ask_price
            .filter(positive)
            .or_else(|| self.bid_price.filter(positive))
    }
}

/// Real-time stock trade.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": "t",
///   "i": 96921,
///   "S": "AAPL",
///   "x": "D",
///   "p": 126.55,
///   "s": 1,
///   "t": "2021-02-22T15:51:44.208Z",
///   "c": ["@", "I"],
///   "z": "C"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTradeMessage {
    /// Ticker symbol (e.g., "AAPL")
    #[serde(rename = "S")]
    pub symbol: String,

    /// Trade price
    #[serde(rename = "p")]
    pub price: Decimal,

    /// Trade size (shares)
    #[serde(rename = "s", default)]
    pub size: Option<i64>,

    /// Trade ID (unique per exchange per day)
    #[serde(rename = "i", default)]
    pub trade_id: Option<i64>,

    /// Exchange timestamp
    #[serde(rename = "t", default)]
    pub timestamp: Option<DateTime<Utc>>,
}

// =============================================================================
// Client Requests
// =============================================================================

/// Authentication request.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    /// Action: "auth"
    pub action: &'static str,

    /// API key
    pub key: String,

    /// API secret
    pub secret: String,
}

impl AuthRequest {
    /// Create a new authentication request.
    #[must_use]
    pub const fn new(key: String, secret: String) -> Self {
        Self {
            action: "auth",
            key,
            secret,
        }
    }
}

/// Subscription request covering trades and quotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Action: "subscribe" or "unsubscribe"
    pub action: &'static str,

    /// Trade symbols
    pub trades: Vec<String>,

    /// Quote symbols
    pub quotes: Vec<String>,
}

impl SubscriptionRequest {
    /// Subscribe to trades and quotes for `symbols`.
    #[must_use]
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self {
            action: "subscribe",
            trades: symbols.clone(),
            quotes: symbols,
        }
    }

    /// Unsubscribe from trades and quotes for `symbols`.
    #[must_use]
    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self {
            action: "unsubscribe",
            trades: symbols.clone(),
            quotes: symbols,
        }
    }
}

// =============================================================================
// Unified Message Type
// =============================================================================

/// Any decoded stock stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Connection/authentication success
    Success(SuccessMessage),

    /// Error message
    Error(ErrorMessage),

    /// Subscription confirmation
    Subscription(SubscriptionMessage),

    /// Stock quote
    Quote(StockQuoteMessage),

    /// Stock trade
    Trade(StockTradeMessage),

    /// Message with a discriminant this service does not consume
    Unknown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_success_kinds() {
        let msg: SuccessMessage =
            serde_json::from_str(r#"{"T":"success","msg":"connected"}"#).unwrap();
        assert_eq!(msg.msg, SuccessKind::Connected);

        let msg: SuccessMessage =
            serde_json::from_str(r#"{"T":"success","msg":"authenticated"}"#).unwrap();
        assert_eq!(msg.msg, SuccessKind::Authenticated);

        let msg: SuccessMessage =
            serde_json::from_str(r#"{"T":"success","msg":"something new"}"#).unwrap();
        assert_eq!(msg.msg, SuccessKind::Other);
    }

    #[test]
    fn test_deserialize_error() {
        let json = r#"{"T":"error","code":406,"msg":"connection limit exceeded"}"#;
        let msg: ErrorMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_connection_limit());
        assert!(!msg.is_auth_error());
    }

    #[test]
    fn test_deserialize_sip_quote() {
        let json = r#"{
            "T": "q",
            "S": "AMD",
            "bx": "U",
            "bp": 87.66,
            "bs": 1,
            "ax": "Q",
            "ap": 87.68,
            "as": 4,
            "t": "2021-02-22T15:51:45.335689322Z",
            "c": ["R"],
            "z": "C"
        }"#;
        let msg: StockQuoteMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.symbol, "AMD");
        assert_eq!(msg.bid_price, Some(Decimal::new(8766, 2)));
        assert_eq!(msg.price(), Some(Decimal::new(8768, 2)));
    }

    #[test]
    fn test_quote_price_falls_back_to_bid() {
        let msg: StockQuoteMessage =
            serde_json::from_str(r#"{"T":"q","S":"AAPL","bp":187.1,"ap":0}"#).unwrap();
        assert_eq!(msg.price(), Some(Decimal::new(1871, 1)));

        let msg: StockQuoteMessage =
            serde_json::from_str(r#"{"T":"q","S":"AAPL","bp":0}"#).unwrap();
        assert_eq!(msg.price(), None);
    }

    #[test]
    fn test_deserialize_minimal_trade() {
        let msg: StockTradeMessage =
            serde_json::from_str(r#"{"T":"t","S":"AAPL","p":126.55}"#).unwrap();
        assert_eq!(msg.price, Decimal::new(12655, 2));
        assert_eq!(msg.timestamp, None);
    }

    #[test]
    fn test_serialize_auth_request() {
        let req = AuthRequest::new("key123".to_string(), "secret456".to_string());
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"action":"auth","key":"key123","secret":"secret456"}"#);
    }

    #[test]
    fn test_serialize_subscription_request() {
        let req = SubscriptionRequest::subscribe(vec!["AAPL".to_string()]);
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"action":"subscribe","trades":["AAPL"],"quotes":["AAPL"]}"#
        );

        let req = SubscriptionRequest::unsubscribe(vec!["MSFT".to_string()]);
        assert_eq!(req.action, "unsubscribe");
        assert_eq!(req.quotes, vec!["MSFT"]);
    }
}
