//! Configuration Module
//!
//! Environment-driven configuration for the price stream service.

mod settings;

pub use settings::{
    ConfigError, Credentials, DataFeed, Endpoints, Environment, IntervalSettings,
    ReconnectSettings, ServerSettings, StreamConfig,
};
