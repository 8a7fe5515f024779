//! Market data REST ports.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Errors returned by market data adapters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MarketDataError {
    /// Transport-level failure.
    #[error("request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Source of on-demand prices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Latest positive price for a symbol.
    ///
    /// Implementations try the latest quote, then the latest trade, then
    /// the most recent daily bar, returning the first positive value.
    /// `Ok(None)` means every step came back empty.
    ///
    /// # Errors
    ///
    /// Returns `MarketDataError` when every step failed.
    async fn latest_price(&self, symbol: &str) -> Result<Option<Decimal>, MarketDataError>;
}

/// Trading calendar lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradingCalendar: Send + Sync {
    /// Trading dates in `[start, end]`.
    ///
    /// # Errors
    ///
    /// Returns `MarketDataError` if the calendar cannot be fetched.
    async fn trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, MarketDataError>;
}
