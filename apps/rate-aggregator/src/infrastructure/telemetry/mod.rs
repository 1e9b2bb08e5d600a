//! Logging and Span Export
//!
//! Installs the global `tracing` subscriber: an env-filtered fmt layer,
//! plus an OTLP span exporter when enabled.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: additional filter directives
//! - `OTEL_ENABLED`: Set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: Service name for traces (default: rate-aggregator)
//!
//! # Usage
//!
//! ```ignore
//! use rate_aggregator::infrastructure::telemetry;
//!
//! // Keep the guard alive until shutdown so spans are flushed.
//! let _guard = telemetry::init();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "rate-aggregator";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Flushes and shuts down the span exporter on drop.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Span exporter shutdown failed: {e}");
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub enabled: bool,
    /// Collector endpoint.
    pub otlp_endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `OTEL_*` variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `OTEL_*` variables through `lookup`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup("OTEL_ENABLED").is_some_and(|v| {
            matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes")
        });

        let otlp_endpoint =
            lookup("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        let service_name =
            lookup("OTEL_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            enabled,
            otlp_endpoint,
            service_name,
        }
    }
}

/// Install the subscriber using configuration from the environment.
///
/// Keep the returned guard alive until shutdown; dropping it flushes
/// pending spans.
#[must_use]
pub fn init() -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env())
}

/// Install the subscriber using `config`.
///
/// If the OTLP exporter cannot be built, logging still starts and spans are
/// not exported.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let tracer_provider = config.enabled.then(|| tracer_provider(&config)).flatten();

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .with(otel_layer)
        .init();

    TelemetryGuard { tracer_provider }
}

#[allow(clippy::expect_used)]
fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env()
        .add_directive(
            "rate_aggregator=info"
                .parse()
                .expect("static directive 'rate_aggregator=info' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        )
}

fn tracer_provider(config: &TelemetryConfig) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .inspect_err(|e| eprintln!("OTLP exporter unavailable, spans will not be exported: {e}"))
        .ok()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

// =============================================================================
// Tests
// =============================================================================
