//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers and process wiring.

/// Alpaca stream connector and REST adapter.
pub mod alpaca;

/// Per-viewer outbound queues and the fanout set.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Viewer WebSocket and price lookup endpoint.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Task wiring and lifecycle.
pub mod runtime;

/// Tracing and OpenTelemetry integration.
pub mod telemetry;
