//! Domain Layer - Core pricing and session logic.
//!
//! This layer contains the price observation types, the staleness
//! validator, trading-session computation and the subscription registry.
//! Nothing here performs I/O; every type is plain Rust with serialization
//! support where it crosses the wire.

/// Price observation types and symbol normalisation.
pub mod market_data;

/// Price-staleness validation and the canonical price cache.
pub mod validation;

/// Trading-session status computation.
pub mod session;

/// Exchange metadata inferred from symbol suffixes.
pub mod exchange;

/// Downstream wire events (inbound requests and outbound broadcasts).
pub mod events;

/// Per-client subscription tracking with reference counting.
pub mod subscription;
