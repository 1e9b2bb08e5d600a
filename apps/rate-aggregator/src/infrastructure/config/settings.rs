//! Rate Aggregator Configuration Settings
//!
//! Configuration types for the aggregator, loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::services::{
    DEFAULT_INITIAL_AVERAGE_DELAY, DEFAULT_RETENTION_DAYS, DEFAULT_SNAPSHOT_HOURS,
};

/// Default Finnhub WebSocket endpoint.
pub const DEFAULT_FEED_URL: &str = "wss://ws.finnhub.io";

/// Symbols tracked when `RATE_SYMBOLS` is unset.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["BINANCE:ETHUSDC", "BINANCE:ETHUSDT", "BINANCE:ETHBTC"];

/// Finnhub API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String) -> Self {
        Self { api_key }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Feed connection settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket endpoint without the token query.
    pub url: String,
    /// Symbols subscribed on every open.
    pub symbols: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Fraction of each delay randomized (0 = none).
    pub reconnect_jitter_factor: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            symbols: DEFAULT_SYMBOLS.iter().map(ToString::to_string).collect(),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(64_000),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter_factor: 0.0,
            max_reconnect_attempts: 10,
        }
    }
}

/// Aggregation cadence settings.
#[derive(Debug, Clone)]
pub struct AggregationSettings {
    /// Delay between a symbol's first tick and its preliminary average.
    pub initial_average_delay: Duration,
    /// Period of the persistence cycle.
    pub hourly_cycle: Duration,
    /// Period of the retention cleanup.
    pub retention_cycle: Duration,
    /// Age in days beyond which stored averages are deleted.
    pub retention_days: u32,
    /// Stored averages sent to a subscriber on attach, per symbol.
    pub snapshot_hours: usize,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            initial_average_delay: DEFAULT_INITIAL_AVERAGE_DELAY,
            hourly_cycle: Duration::from_secs(3600),
            retention_cycle: Duration::from_secs(86_400),
            retention_days: DEFAULT_RETENTION_DAYS,
            snapshot_hours: DEFAULT_SNAPSHOT_HOURS,
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// SQLite database file.
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("rates.db"),
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Capacity of the shared event channel.
    pub capacity: usize,
    /// Minimum spacing between live ticks of one symbol.
    pub live_tick_interval: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            capacity: 4096,
            live_tick_interval: Duration::from_millis(1000),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Prometheus metrics port (0 = no listener).
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { metrics_port: 9090 }
    }
}

/// Complete aggregator configuration.
#[derive(Debug, Clone)]
pub struct RateAggregatorConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// Aggregation cadence settings.
    pub aggregation: AggregationSettings,
    /// Storage settings.
    pub storage: StorageSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl RateAggregatorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// Unparseable optional values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if `FINNHUB_API_KEY` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let api_key = env
            .get("FINNHUB_API_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("FINNHUB_API_KEY".to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue("FINNHUB_API_KEY".to_string()));
        }

        let feed_defaults = FeedSettings::default();
        let feed = FeedSettings {
            url: env
                .get("FINNHUB_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(feed_defaults.url),
            symbols: env
                .get("RATE_SYMBOLS")
                .map(|v| parse_symbols(&v))
                .filter(|symbols| !symbols.is_empty())
                .unwrap_or(feed_defaults.symbols),
            reconnect_delay_initial: env.millis(
                "RATE_RECONNECT_DELAY_INITIAL_MS",
                feed_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.millis(
                "RATE_RECONNECT_DELAY_MAX_MS",
                feed_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "RATE_RECONNECT_DELAY_MULTIPLIER",
                feed_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter_factor: env.parse(
                "RATE_RECONNECT_JITTER_FACTOR",
                feed_defaults.reconnect_jitter_factor,
            ),
            max_reconnect_attempts: env.parse(
                "RATE_MAX_RECONNECT_ATTEMPTS",
                feed_defaults.max_reconnect_attempts,
            ),
        };

        let aggregation_defaults = AggregationSettings::default();
        let aggregation = AggregationSettings {
            initial_average_delay: env.millis(
                "RATE_INITIAL_AVERAGE_DELAY_MS",
                aggregation_defaults.initial_average_delay,
            ),
            hourly_cycle: env.secs("RATE_HOURLY_CYCLE_SECS", aggregation_defaults.hourly_cycle),
            retention_cycle: env.secs(
                "RATE_RETENTION_CYCLE_SECS",
                aggregation_defaults.retention_cycle,
            ),
            retention_days: env.parse("RATE_RETENTION_DAYS", aggregation_defaults.retention_days),
            snapshot_hours: env.parse("RATE_SNAPSHOT_HOURS", aggregation_defaults.snapshot_hours),
        };

        let storage = StorageSettings {
            database_path: env
                .get("RATE_DATABASE_PATH")
                .filter(|v| !v.trim().is_empty())
                .map_or_else(|| StorageSettings::default().database_path, PathBuf::from),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            capacity: env
                .parse("RATE_BROADCAST_CAPACITY", broadcast_defaults.capacity)
                .max(1),
            live_tick_interval: env.millis(
                "RATE_LIVE_TICK_THROTTLE_MS",
                broadcast_defaults.live_tick_interval,
            ),
        };

        let server = ServerSettings {
            metrics_port: env.parse("METRICS_PORT", ServerSettings::default().metrics_port),
        };

        Ok(Self {
            credentials: Credentials::new(api_key),
            feed,
            aggregation,
            storage,
            broadcast,
            server,
        })
    }

    /// WebSocket URL including the API token.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("{}?token={}", self.feed.url, self.credentials.api_key())
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

/// Strip the query string from a URL before logging it.
#[must_use]
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?[REDACTED]"),
        None => url.to_string(),
    }
}

fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    symbols
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(default, Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RateAggregatorConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        RateAggregatorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_api_key() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "FINNHUB_API_KEY"));
    }

    #[test]
    fn empty_api_key() {
        let err = config_from(&[("FINNHUB_API_KEY", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn defaults_with_only_api_key() {
        let config = config_from(&[("FINNHUB_API_KEY", "abc")]).unwrap();

        assert_eq!(config.feed.url, DEFAULT_FEED_URL);
        assert_eq!(config.feed.symbols, DEFAULT_SYMBOLS);
        assert_eq!(config.feed.max_reconnect_attempts, 10);
        assert_eq!(config.feed.reconnect_delay_max, Duration::from_secs(64));
        assert_eq!(
            config.aggregation.initial_average_delay,
            Duration::from_secs(2)
        );
        assert_eq!(config.aggregation.retention_days, 7);
        assert_eq!(config.aggregation.snapshot_hours, 24);
        assert_eq!(config.storage.database_path, PathBuf::from("rates.db"));
        assert_eq!(config.broadcast.capacity, 4096);
        assert_eq!(config.server.metrics_port, 9090);
        assert_eq!(config.stream_url(), "wss://ws.finnhub.io?token=abc");
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "abc"),
            ("FINNHUB_WS_URL", "ws://127.0.0.1:9000"),
            ("RATE_SYMBOLS", " BINANCE:BTCUSDT, ,BINANCE:BTCUSDT,BINANCE:SOLUSDT "),
            ("RATE_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("RATE_MAX_RECONNECT_ATTEMPTS", "0"),
            ("RATE_HOURLY_CYCLE_SECS", "60"),
            ("RATE_RETENTION_DAYS", "30"),
            ("METRICS_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.feed.url, "ws://127.0.0.1:9000");
        assert_eq!(config.feed.symbols, ["BINANCE:BTCUSDT", "BINANCE:SOLUSDT"]);
        assert_eq!(
            config.feed.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(config.feed.max_reconnect_attempts, 0);
        assert_eq!(config.aggregation.hourly_cycle, Duration::from_secs(60));
        assert_eq!(config.aggregation.retention_days, 30);
        assert_eq!(config.server.metrics_port, 0);
    }

    #[test]
    fn unparseable_values_fall_back() {
        let config = config_from(&[
            ("FINNHUB_API_KEY", "abc"),
            ("RATE_RECONNECT_DELAY_MULTIPLIER", "fast"),
            ("RATE_HOURLY_CYCLE_SECS", "0"),
            ("RATE_SYMBOLS", " , "),
        ])
        .unwrap();

        assert!((config.feed.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.aggregation.hourly_cycle, Duration::from_secs(3600));
        assert_eq!(config.feed.symbols.len(), 3);
    }

    #[test]
    fn credentials_redacted_debug() {
        let config = config_from(&[("FINNHUB_API_KEY", "key123")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("key123"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn redact_url_hides_query() {
        assert_eq!(
            redact_url("wss://ws.finnhub.io?token=key123"),
            "wss://ws.finnhub.io?[REDACTED]"
        );
        assert_eq!(redact_url("ws://localhost:1"), "ws://localhost:1");
    }
}
