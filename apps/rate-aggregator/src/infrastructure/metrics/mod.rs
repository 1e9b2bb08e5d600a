//! Prometheus Metrics Module
//!
//! Exposes aggregator metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: ticks, frames by kind, malformed frames, connection state
//! - **Reconnects**: attempts and exhaustion
//! - **Persistence**: averages saved, failures, cycle duration
//! - **Retention**: rows deleted and failed runs
//! - **Broadcast**: throttled live ticks and attached subscribers
//!
//! Recording functions are no-ops until a recorder is installed, so unit
//! tests may call into instrumented code freely.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const TICKS_RECEIVED: &str = "rate_aggregator_ticks_received_total";
const FEED_MESSAGES: &str = "rate_aggregator_feed_messages_total";
const MALFORMED_MESSAGES: &str = "rate_aggregator_malformed_messages_total";
const FEED_ERRORS: &str = "rate_aggregator_feed_errors_total";
const FEED_CONNECTED: &str = "rate_aggregator_feed_connected";
const RECONNECT_ATTEMPTS: &str = "rate_aggregator_reconnect_attempts_total";
const RECONNECT_EXHAUSTED: &str = "rate_aggregator_reconnect_exhausted_total";
const AVERAGES_PERSISTED: &str = "rate_aggregator_averages_persisted_total";
const PERSISTENCE_FAILURES: &str = "rate_aggregator_persistence_failures_total";
const PERSISTENCE_CYCLE_SECONDS: &str = "rate_aggregator_persistence_cycle_seconds";
const BUFFERED_SYMBOLS: &str = "rate_aggregator_buffered_symbols";
const RETENTION_DELETED: &str = "rate_aggregator_retention_deleted_total";
const RETENTION_FAILURES: &str = "rate_aggregator_retention_failures_total";
const LIVE_TICKS_THROTTLED: &str = "rate_aggregator_live_ticks_throttled_total";
const SUBSCRIBERS: &str = "rate_aggregator_subscribers";

const CYCLE_BUCKETS: [f64; 8] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

// =============================================================================
// Installation
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// A non-zero `port` starts an HTTP listener serving `/metrics` on all
/// interfaces. Port 0 installs the recorder without a listener; its output
/// is then available through [`get_metrics_handle`].
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if the exporter cannot be configured or a recorder is
/// already installed.
pub fn init_metrics(port: u16) -> Result<(), MetricsError> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(PERSISTENCE_CYCLE_SECONDS.to_string()),
            &CYCLE_BUCKETS,
        )
        .map_err(|e| MetricsError::Configuration(e.to_string()))?;

    if port == 0 {
        let handle = builder
            .install_recorder()
            .map_err(|e| MetricsError::Installation(e.to_string()))?;
        let _ = PROMETHEUS_HANDLE.set(handle);
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        builder
            .with_http_listener(addr)
            .install()
            .map_err(|e| MetricsError::Installation(e.to_string()))?;
        tracing::info!(%addr, "Prometheus metrics exporter started");
    }

    register_metrics();
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Only set when the recorder was installed without a listener.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Metrics initialization error.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(TICKS_RECEIVED, "Trade ticks buffered, by symbol");
    describe_counter!(FEED_MESSAGES, "Decoded feed frames, by kind");
    describe_counter!(MALFORMED_MESSAGES, "Feed frames that failed to decode");
    describe_counter!(FEED_ERRORS, "WebSocket transport errors");
    describe_gauge!(FEED_CONNECTED, "1 while the feed connection is open");

    // Reconnects
    describe_counter!(RECONNECT_ATTEMPTS, "Scheduled reconnection attempts");
    describe_counter!(
        RECONNECT_EXHAUSTED,
        "Times the reconnection budget ran out"
    );

    // Persistence
    describe_counter!(AVERAGES_PERSISTED, "Hourly averages saved, by symbol");
    describe_counter!(
        PERSISTENCE_FAILURES,
        "Hourly averages that could not be saved, by symbol"
    );
    describe_histogram!(
        PERSISTENCE_CYCLE_SECONDS,
        "Duration of one hourly persistence cycle"
    );
    describe_gauge!(BUFFERED_SYMBOLS, "Symbols holding unpersisted samples");

    // Retention
    describe_counter!(RETENTION_DELETED, "Stored averages removed by retention");
    describe_counter!(RETENTION_FAILURES, "Retention runs that failed");

    // Broadcast
    describe_counter!(
        LIVE_TICKS_THROTTLED,
        "Live ticks suppressed by the per-symbol throttle"
    );
    describe_gauge!(SUBSCRIBERS, "Attached subscribers");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a buffered trade tick.
pub fn record_tick_received(symbol: &str) {
    counter!(TICKS_RECEIVED, "symbol" => symbol.to_string()).increment(1);
}

/// Record a decoded feed frame.
pub fn record_feed_message(kind: &'static str) {
    counter!(FEED_MESSAGES, "kind" => kind).increment(1);
}

/// Record a frame that failed to decode.
pub fn record_malformed_message() {
    counter!(MALFORMED_MESSAGES).increment(1);
}

/// Record a WebSocket transport error.
pub fn record_feed_error() {
    counter!(FEED_ERRORS).increment(1);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!(FEED_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!(RECONNECT_ATTEMPTS).increment(1);
}

/// Record that reconnection gave up.
pub fn record_reconnect_exhausted() {
    counter!(RECONNECT_EXHAUSTED).increment(1);
}

/// Record a saved hourly average.
pub fn record_average_persisted(symbol: &str) {
    counter!(AVERAGES_PERSISTED, "symbol" => symbol.to_string()).increment(1);
}

/// Record a failed hourly average save.
pub fn record_persistence_failure(symbol: &str) {
    counter!(PERSISTENCE_FAILURES, "symbol" => symbol.to_string()).increment(1);
}

/// Record the duration of a persistence cycle.
pub fn record_persistence_cycle_duration(duration: Duration) {
    histogram!(PERSISTENCE_CYCLE_SECONDS).record(duration.as_secs_f64());
}

/// Update the buffered symbol gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_buffered_symbols(count: usize) {
    gauge!(BUFFERED_SYMBOLS).set(count as f64);
}

/// Record rows removed by retention.
pub fn record_retention_deleted(count: u64) {
    counter!(RETENTION_DELETED).increment(count);
}

/// Record a failed retention run.
pub fn record_retention_failure() {
    counter!(RETENTION_FAILURES).increment(1);
}

/// Record a live tick suppressed by the throttle.
pub fn record_live_tick_throttled(symbol: &str) {
    counter!(LIVE_TICKS_THROTTLED, "symbol" => symbol.to_string()).increment(1);
}

/// Update the attached subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!(SUBSCRIBERS).set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_tick_received("BINANCE:ETHUSDT");
        record_feed_message("trade");
        set_feed_connected(true);
        record_persistence_cycle_duration(Duration::from_millis(3));
        set_subscribers(2);
    }

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            TICKS_RECEIVED,
            FEED_MESSAGES,
            FEED_CONNECTED,
            PERSISTENCE_CYCLE_SECONDS,
            SUBSCRIBERS,
        ] {
            assert!(name.starts_with("rate_aggregator_"), "{name}");
        }
    }

    #[test]
    fn metrics_error_display() {
        let err = MetricsError::Installation("already installed".to_string());
        assert_eq!(
            err.to_string(),
            "metrics installation error: already installed"
        );
    }
}
