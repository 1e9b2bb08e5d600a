//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, and the runtime that wires them.

/// Finnhub WebSocket client, codec and feed session.
pub mod feed;

/// Broadcast channel adapter implementing the publisher port.
pub mod broadcast;

/// SQLite and in-memory rate stores.
pub mod persistence;

/// Wall-clock aligned periodic triggers.
pub mod scheduler;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Component wiring and lifecycle.
pub mod runtime;
