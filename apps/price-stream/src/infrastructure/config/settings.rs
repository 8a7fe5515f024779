//! Price Stream Configuration Settings
//!
//! Configuration types for the price stream, loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use rust_decimal::Decimal;

use crate::application::services::EngineConfig;
use crate::domain::validation::ValidationConfig;

/// Market data feed type for Alpaca streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// SIP (Securities Information Processor) - Full market data.
    #[default]
    Sip,
    /// IEX (Investors Exchange) - Free tier with limited data.
    Iex,
}

impl DataFeed {
    /// Parse feed type from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("iex") {
            Self::Iex
        } else {
            Self::Sip
        }
    }

    /// Feed name used in stream URLs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
        }
    }
}

/// Trading environment (paper vs live).
///
/// Only selects the trading API host used for the calendar. Market data
/// hosts are the same for both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Paper trading environment (simulated).
    #[default]
    Paper,
    /// Live trading environment (real money).
    Live,
}

impl Environment {
    /// Parse environment from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("live") {
            Self::Live
        } else {
            Self::Paper
        }
    }

    /// Check if this is the live environment.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Get the environment name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Live => "live",
        }
    }

    const fn trading_base_url(self) -> &'static str {
        match self {
            Self::Paper => "https://paper-api.alpaca.markets",
            Self::Live => "https://api.alpaca.markets",
        }
    }
}

/// Alpaca API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Upstream reconnection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Delay before each reconnection attempt.
    pub delay: Duration,
    /// Upper bound on the delay when a multiplier is configured.
    pub max_delay: Duration,
    /// Delay growth factor (1.0 = fixed delay).
    pub multiplier: f64,
    /// Jitter fraction applied to each delay.
    pub jitter_factor: f64,
    /// Consecutive attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Delay after the server reports the connection limit.
    pub connection_limit_delay: Duration,
    /// Timeout for the transport handshake.
    pub connect_timeout: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 5,
            connection_limit_delay: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Downstream WebSocket and price lookup port.
    pub port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8090,
            health_port: 8091,
        }
    }
}

/// Engine timing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalSettings {
    /// Fallback poller tick.
    pub poll: Duration,
    /// Session monitor tick.
    pub session: Duration,
    /// REST request timeout.
    pub rest_timeout: Duration,
}

impl Default for IntervalSettings {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(1),
            session: Duration::from_secs(120),
            rest_timeout: Duration::from_secs(10),
        }
    }
}

/// Upstream endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Stock stream WebSocket URL.
    pub stream_url: String,
    /// Market data REST base URL.
    pub data_url: String,
    /// Trading REST base URL (calendar).
    pub trading_url: String,
}

impl Endpoints {
    fn for_feed(feed: DataFeed, environment: Environment) -> Self {
        Self {
            stream_url: format!("wss://stream.data.alpaca.markets/v2/{}", feed.as_str()),
            data_url: "https://data.alpaca.markets".to_string(),
            trading_url: environment.trading_base_url().to_string(),
        }
    }
}

/// Complete price stream configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Trading environment.
    pub environment: Environment,
    /// Market data feed type.
    pub feed: DataFeed,
    /// API credentials.
    pub credentials: Credentials,
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream reconnection settings.
    pub reconnect: ReconnectSettings,
    /// Validator thresholds.
    pub validation: ValidationConfig,
    /// Engine timing settings.
    pub intervals: IntervalSettings,
    /// Upstream endpoints.
    pub endpoints: Endpoints,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required values are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let api_key = env.required("ALPACA_KEY")?;
        let api_secret = env.required("ALPACA_SECRET")?;

        let environment = env
            .get("CREAM_ENV")
            .map(|s| Environment::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let feed = env
            .get("ALPACA_FEED")
            .map(|s| DataFeed::from_str_case_insensitive(&s))
            .unwrap_or_default();

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            port: env.parse("PRICE_STREAM_PORT", server_defaults.port),
            health_port: env.parse("PRICE_STREAM_HEALTH_PORT", server_defaults.health_port),
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay: env.secs("PRICE_STREAM_RECONNECT_DELAY_SECS", reconnect_defaults.delay),
            max_delay: env.secs(
                "PRICE_STREAM_RECONNECT_DELAY_MAX_SECS",
                reconnect_defaults.max_delay,
            ),
            multiplier: env.parse(
                "PRICE_STREAM_RECONNECT_DELAY_MULTIPLIER",
                reconnect_defaults.multiplier,
            ),
            jitter_factor: env.parse(
                "PRICE_STREAM_RECONNECT_JITTER",
                reconnect_defaults.jitter_factor,
            ),
            max_attempts: env.parse(
                "PRICE_STREAM_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
            connection_limit_delay: env.secs(
                "PRICE_STREAM_CONNECTION_LIMIT_DELAY_SECS",
                reconnect_defaults.connection_limit_delay,
            ),
            connect_timeout: env.secs(
                "PRICE_STREAM_CONNECT_TIMEOUT_SECS",
                reconnect_defaults.connect_timeout,
            ),
        };

        let validation_defaults = ValidationConfig::default();
        let validation = ValidationConfig {
            trade_window: env.parse(
                "PRICE_STREAM_TRADE_WINDOW",
                validation_defaults.trade_window,
            ),
            trade_max_age: env
                .get("PRICE_STREAM_TRADE_MAX_AGE_SECS")
                .and_then(|v| v.parse::<i64>().ok())
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(validation_defaults.trade_max_age),
            max_quote_deviation: env.decimal(
                "PRICE_STREAM_MAX_QUOTE_DEVIATION",
                validation_defaults.max_quote_deviation,
            ),
            large_change_threshold: env.decimal(
                "PRICE_STREAM_LARGE_CHANGE_THRESHOLD",
                validation_defaults.large_change_threshold,
            ),
            min_change: env.decimal("PRICE_STREAM_MIN_CHANGE", validation_defaults.min_change),
        };

        let interval_defaults = IntervalSettings::default();
        let intervals = IntervalSettings {
            poll: env.millis("PRICE_STREAM_POLL_INTERVAL_MS", interval_defaults.poll),
            session: env.secs(
                "PRICE_STREAM_SESSION_INTERVAL_SECS",
                interval_defaults.session,
            ),
            rest_timeout: env.secs(
                "PRICE_STREAM_REST_TIMEOUT_SECS",
                interval_defaults.rest_timeout,
            ),
        };

        let defaults = Endpoints::for_feed(feed, environment);
        let endpoints = Endpoints {
            stream_url: env.get("ALPACA_STREAM_URL").unwrap_or(defaults.stream_url),
            data_url: env.get("ALPACA_DATA_URL").unwrap_or(defaults.data_url),
            trading_url: env.get("ALPACA_TRADING_URL").unwrap_or(defaults.trading_url),
        };

        Ok(Self {
            environment,
            feed,
            credentials: Credentials::new(api_key, api_secret),
            server,
            reconnect,
            validation,
            intervals,
            endpoints,
        })
    }

    /// Engine tuning derived from this configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            validation: self.validation.clone(),
            poll_interval: self.intervals.poll,
            session_interval: self.intervals.session,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn decimal(&self, key: &str, default: Decimal) -> Decimal {
        self.get(key)
            .and_then(|v| Decimal::from_str(v.trim()).ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map_or(default, Duration::from_millis)
    }
}
