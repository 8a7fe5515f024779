//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSource`: REST price lookup (quote, trade, daily bar cascade)
//! - `TradingCalendar`: Trading-day calendar lookup
//!
//! ## Upstream Stream Messages
//!
//! - `UpstreamEvent`: Events emitted by the stream connector into the engine
//! - `UpstreamCommand`: Subscription commands sent by the engine to the connector

mod market_data;
mod upstream;

pub use market_data::{MarketDataError, PriceSource, TradingCalendar};
pub use upstream::{ConnectionState, UpstreamAction, UpstreamCommand, UpstreamEvent};

#[cfg(test)]
pub use market_data::{MockPriceSource, MockTradingCalendar};
