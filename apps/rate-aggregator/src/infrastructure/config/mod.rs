//! Configuration Module
//!
//! Configuration loading for the aggregator service.

mod settings;

pub use settings::{
    AggregationSettings, BroadcastSettings, ConfigError, Credentials, DEFAULT_FEED_URL,
    DEFAULT_SYMBOLS, FeedSettings, RateAggregatorConfig, ServerSettings, StorageSettings,
    redact_url,
};
