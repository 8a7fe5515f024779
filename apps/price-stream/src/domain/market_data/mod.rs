//! Market Data Observation Types
//!
//! A price observation is a single price sample for a symbol, tagged with
//! the channel it arrived on. Observations are ephemeral: they are handed
//! to the validator and either folded into the canonical cache or dropped.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// A ticker symbol, always stored in normalised (trimmed, uppercase) form.
pub type Symbol = String;

/// Normalise a raw symbol from a client or an upstream frame.
///
/// Returns `None` for empty input and for anything that is not a ticker:
/// ASCII letters, digits, `.` and `-`, starting with a letter or digit.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<Symbol> {
    let trimmed = raw.trim();
    let first = trimmed.chars().next()?;
    let is_ticker = first.is_ascii_alphanumeric()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    is_ticker.then(|| trimmed.to_ascii_uppercase())
}

/// Channel an observation arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    /// Executed trade from the upstream stream.
    Trade,
    /// Top-of-book quote from the upstream stream.
    Quote,
    /// REST lookup issued by the fallback poller.
    Poll,
}

impl ObservationSource {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Quote => "quote",
            Self::Poll => "poll",
        }
    }

    /// Whether this observation came from the live stream.
    #[must_use]
    pub const fn is_stream(self) -> bool {
        matches!(self, Self::Trade | Self::Quote)
    }
}

/// A single price sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceObservation {
    /// Normalised symbol.
    pub symbol: Symbol,
    /// Observed price.
    pub price: Decimal,
    /// Channel the sample arrived on.
    pub source: ObservationSource,
    /// Local receipt time (stream) or request time (poll).
    pub observed_at: DateTime<Utc>,
}

impl PriceObservation {
    /// Create a new observation.
    #[must_use]
    pub fn new(
        symbol: impl Into<Symbol>,
        price: Decimal,
        source: ObservationSource,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            source,
            observed_at,
        }
    }

    /// Create a trade observation.
    #[must_use]
    pub fn trade(symbol: impl Into<Symbol>, price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self::new(symbol, price, ObservationSource::Trade, observed_at)
    }

    /// Create a quote observation.
    #[must_use]
    pub fn quote(symbol: impl Into<Symbol>, price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self::new(symbol, price, ObservationSource::Quote, observed_at)
    }

    /// Create a poll observation.
    #[must_use]
    pub fn poll(symbol: impl Into<Symbol>, price: Decimal, requested_at: DateTime<Utc>) -> Self {
        Self::new(symbol, price, ObservationSource::Poll, requested_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize_symbol("  aapl "), Some("AAPL".to_string()));
        assert_eq!(normalize_symbol("vod.l"), Some("VOD.L".to_string()));
    }

    #[test]
    fn normalize_rejects_empty() {
        assert_eq!(normalize_symbol(""), None);
        assert_eq!(normalize_symbol("   "), None);
    }

    #[test]
    fn normalize_rejects_non_ticker_characters() {
        assert_eq!(normalize_symbol("brk-b"), Some("BRK-B".to_string()));
        assert_eq!(normalize_symbol("../v2/account"), None);
        assert_eq!(normalize_symbol("AAPL/quotes"), None);
        assert_eq!(normalize_symbol("AAPL?feed=iex"), None);
        assert_eq!(normalize_symbol(".."), None);
        assert_eq!(normalize_symbol("ÀPPL"), None);
    }

    #[test]
    fn stream_sources() {
        assert!(ObservationSource::Trade.is_stream());
        assert!(ObservationSource::Quote.is_stream());
        assert!(!ObservationSource::Poll.is_stream());
    }
}
