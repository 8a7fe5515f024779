#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream - Real-Time Market Data Distribution
//!
//! Holds a single authenticated connection to Alpaca's stock stream,
//! validates every trade and quote against staleness rules, and fans the
//! accepted prices out to WebSocket viewers. While the stream is down a
//! REST poller keeps the subscribed symbols fresh, and a session monitor
//! broadcasts market open/close status.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Prices, validation, sessions and subscriptions
//!   - `market_data`: Price observations and symbol normalisation
//!   - `validation`: Staleness rules and the canonical price cache
//!   - `session`: Trading-session status from hours and calendars
//!   - `subscription`: Reference-counted client subscriptions
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: REST price source, trading calendar, upstream channel types
//!   - `services`: Engine actor, fallback poller, session monitor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `alpaca`: Stream connector and REST adapter
//!   - `broadcast`: Per-viewer queues
//!   - `http`: Viewer WebSocket and price lookup
//!   - `health`: Health, readiness and metrics endpoint
//!   - `runtime`: Task wiring and shutdown
//!
//! # Data Flow
//!
//! ```text
//!                    ┌────────────────┐   events   ┌──────────┐   frames   ┌─────────┐
//! Alpaca stock WS ──►│ StreamConnector│───────────►│  Engine  │───────────►│ viewers │
//!                    └────────────────┘◄───────────└──────────┘◄───────────└─────────┘
//!                          subscribe/unsubscribe     ▲      ▲   subscribe/unsubscribe
//!                                                    │      │
//!                               FallbackPoller (REST)┘      └SessionMonitor (calendar)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core pricing types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{ClientRequest, ServerEvent};
pub use domain::market_data::{ObservationSource, PriceObservation, Symbol, normalize_symbol};
pub use domain::subscription::{ClientId, SubscriptionRegistry};
pub use domain::validation::{PriceValidator, ValidationConfig};

// Ports
pub use application::ports::{MarketDataError, PriceSource, TradingCalendar};

// Engine
pub use application::services::{EngineConfig, EngineHandle, EngineSnapshot};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, Credentials, DataFeed, Environment, ServerSettings, StreamConfig,
};

// Alpaca adapters
pub use infrastructure::alpaca::{
    AlpacaRestClient, ReconnectConfig, StreamConnectorConfig, StreamError,
};

// Service wiring
pub use infrastructure::runtime::{RunningService, ServiceParts, start};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
