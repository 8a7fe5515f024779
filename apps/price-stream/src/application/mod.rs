//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the engine that coordinates the domain, the
//! background tasks it supervises, and the port interfaces that
//! infrastructure adapters implement.

/// Port interfaces for external systems (market data REST, upstream stream).
pub mod ports;

/// Engine, fallback poller, session monitor and fanout.
pub mod services;
