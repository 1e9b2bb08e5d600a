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

//! Rate Aggregator - Crypto Price Ingestion and Hourly Averages
//!
//! Keeps one WebSocket connection to Finnhub's trade feed, buffers prices
//! per symbol, publishes live ticks, and persists an hourly average per
//! symbol with a rolling retention window.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and pure aggregation
//!   - `trade`: trades, samples and hourly average records
//!   - `aggregation`: mean and hour/day arithmetic
//!   - `buffer`: per-symbol sample buffer with initial-average timers
//!   - `events`: events delivered to subscribers
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: rate store, rate publisher, feed decoder
//!   - `services`: ingestion, hourly persistence, initial snapshots
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: stream client with backoff, codec, subscription session
//!   - `broadcast`: channel-based event fan-out
//!   - `persistence`: SQLite store
//!   - `scheduler`: periodic triggers
//!   - `config`, `metrics`, `telemetry`
//!   - `runtime`: start/stop lifecycle
//!
//! # Data Flow
//!
//! ```text
//!                          ┌──────────────┐  live ticks  ┌─────────────┐
//! Finnhub WS ──► Stream ──►│  Ingestion   │─────────────►│  Broadcast  │──► Subscriber 1
//!                Client    │ Coordinator  │              │     Hub     │──► Subscriber N
//!                          └──────┬───────┘              └──────▲──────┘
//!                                 │ samples                     │ hourly averages
//!                          ┌──────▼───────┐  hourly      ┌──────┴──────┐
//!                          │ Price Buffer │─────────────►│ Persistence │──► SQLite
//!                          └──────────────┘              │    Cycle    │
//!                                                        └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core aggregation types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::{
    HourlyAverageRecord, NewHourlyAverage, PriceBuffer, PriceSample, RateEvent, SubscriberId,
    Trade,
};

// Application services
pub use application::services::{
    CycleReport, IngestOutcome, IngestionCoordinator, InitialSnapshotService, PersistenceCycle,
};

// Infrastructure config
pub use infrastructure::config::{
    AggregationSettings, BroadcastSettings, ConfigError, Credentials, FeedSettings,
    RateAggregatorConfig, ServerSettings, StorageSettings,
};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub, Subscriber,
};

// Stores
pub use infrastructure::persistence::{InMemoryRateStore, SqliteRateStore};

// Runtime
pub use infrastructure::runtime::{RateAggregatorRuntime, RuntimeSettings};

// Metrics
pub use infrastructure::metrics::{MetricsError, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
