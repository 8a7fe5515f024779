//! Alpaca REST Adapter
//!
//! Implements the `PriceSource` and `TradingCalendar` ports against
//! Alpaca's market data and trading APIs.
//!
//! # Price Cascade
//!
//! 1. `GET {data}/v2/stocks/{symbol}/quotes/latest` (ask, then bid)
//! 2. `GET {data}/v2/stocks/{symbol}/trades/latest`
//! 3. `GET {data}/v2/stocks/{symbol}/bars?timeframe=1Day&limit=1&sort=desc`
//!
//! The first positive price wins. A failing step is logged and the cascade
//! moves on; only when every step fails is the error returned.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::application::ports::{MarketDataError, PriceSource, TradingCalendar};
use crate::infrastructure::config::{Credentials, StreamConfig};

const MAX_ERROR_BODY: usize = 512;

/// REST adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// Client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    /// Request did not complete.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success response.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Body did not parse.
    #[error("JSON parse error: {0}")]
    JsonParse(String),
}

impl From<RestError> for MarketDataError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Build(msg) | RestError::Network(msg) => Self::Request(msg),
            RestError::Api { status, message } => Self::Status {
                status,
                body: message,
            },
            RestError::JsonParse(msg) => Self::Decode(msg),
        }
    }
}

/// HTTP client for Alpaca's data and trading REST APIs.
#[derive(Debug, Clone)]
pub struct AlpacaRestClient {
    client: Client,
    credentials: Credentials,
    data_base_url: String,
    trading_base_url: String,
}

impl AlpacaRestClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        credentials: Credentials,
        data_base_url: impl Into<String>,
        trading_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Build(e.to_string()))?;

        Ok(Self {
            client,
            credentials,
            data_base_url: trim_base(data_base_url.into()),
            trading_base_url: trim_base(trading_base_url.into()),
        })
    }

    /// Create a client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &StreamConfig) -> Result<Self, RestError> {
        Self::new(
            config.credentials.clone(),
            config.endpoints.data_url.clone(),
            config.endpoints.trading_url.clone(),
            config.intervals.rest_timeout,
        )
    }

    async fn get<T: DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RestError> {
        let url = format!("{base_url}{path}");

        let response = self
            .client
            .get(&url)
            .query(query)
            .header("APCA-API-KEY-ID", self.credentials.api_key())
            .header("APCA-API-SECRET-KEY", self.credentials.api_secret())
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut message, MAX_ERROR_BODY);
            return Err(RestError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| RestError::JsonParse(e.to_string()))
    }

    async fn latest_quote_price(&self, symbol: &str) -> Result<Option<Decimal>, RestError> {
        let path = format!("/v2/stocks/{symbol}/quotes/latest");
        let response: LatestQuoteResponse = self.get(&self.data_base_url, &path, &[]).await?;
        Ok(response
            .quote
            .and_then(|q| positive(q.ap).or_else(|| positive(q.bp))))
    }

    async fn latest_trade_price(&self, symbol: &str) -> Result<Option<Decimal>, RestError> {
        let path = format!("/v2/stocks/{symbol}/trades/latest");
        let response: LatestTradeResponse = self.get(&self.data_base_url, &path, &[]).await?;
        Ok(response.trade.and_then(|t| positive(t.p)))
    }

    async fn latest_bar_close(&self, symbol: &str) -> Result<Option<Decimal>, RestError> {
        let path = format!("/v2/stocks/{symbol}/bars");
        let query = [("timeframe", "1Day"), ("limit", "1"), ("sort", "desc")];
        let response: BarsResponse = self.get(&self.data_base_url, &path, &query).await?;
        Ok(response
            .bars
            .unwrap_or_default()
            .first()
            .and_then(|bar| positive(bar.c)))
    }
}

#[async_trait]
impl PriceSource for AlpacaRestClient {
    async fn latest_price(&self, symbol: &str) -> Result<Option<Decimal>, MarketDataError> {
        let steps = [Step::Quote, Step::Trade, Step::Bar];
        let mut failures = 0;
        let mut last_error = None;

        for step in steps {
            let result = match step {
                Step::Quote => self.latest_quote_price(symbol).await,
                Step::Trade => self.latest_trade_price(symbol).await,
                Step::Bar => self.latest_bar_close(symbol).await,
            };

            match result {
                Ok(Some(price)) => {
                    tracing::trace!(symbol, step = step.as_str(), %price, "REST price resolved");
                    return Ok(Some(price));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(symbol, step = step.as_str(), error = %e, "REST price step failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if failures == steps.len() => Err(e.into()),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl TradingCalendar for AlpacaRestClient {
    async fn trading_days(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, MarketDataError> {
        let start = start.format("%Y-%m-%d").to_string();
        let end = end.format("%Y-%m-%d").to_string();
        let query = [("start", start.as_str()), ("end", end.as_str())];

        let days: Vec<CalendarDay> = self
            .get(&self.trading_base_url, "/v2/calendar", &query)
            .await?;

        Ok(days.into_iter().map(|day| day.date).collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Quote,
    Trade,
    Bar,
}

impl Step {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Trade => "trade",
            Self::Bar => "bar",
        }
    }
}

fn positive(price: Option<Decimal>) -> Option<Decimal> {
    price.filter(|p| *p > Decimal::ZERO)
}

/// Shorten to at most `max` bytes without splitting a character.
fn truncate_on_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let cut = (0..=max)
        .rev()
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(0);
    text.truncate(cut);
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

// =============================================================================
// API Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct LatestQuoteResponse {
    quote: Option<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    ap: Option<Decimal>,
    #[serde(default)]
    bp: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct LatestTradeResponse {
    trade: Option<TradeData>,
}

#[derive(Debug, Deserialize)]
struct TradeData {
    #[serde(default)]
    p: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Option<Vec<BarData>>,
}

#[derive(Debug, Deserialize)]
struct BarData {
    #[serde(default)]
    c: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct CalendarDay {
    date: NaiveDate,
}
