//! Ingestion Coordinator
//!
//! Turns feed frames into buffered samples and live-tick publications.
//!
//! # Flow
//!
//! ```text
//! text frame ──► decode ──► ping / unknown ──► dropped
//!                      ├──► error ──────────► logged
//!                      └──► trades ─┬─► PriceBuffer::add_sample
//!                                   ├─► first sample? schedule preliminary average
//!                                   └─► publish live tick
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::{FeedDecoderPort, RatePublisherPort};
use crate::domain::{FeedMessage, PriceBuffer, Trade};
use crate::infrastructure::metrics;

/// Default delay between a symbol's first tick and its preliminary average.
pub const DEFAULT_INITIAL_AVERAGE_DELAY: Duration = Duration::from_millis(2000);

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Frame carried trades; this many were buffered.
    Ingested(usize),
    /// Keep-alive or a frame type that is not consumed.
    Ignored,
    /// The provider reported an error.
    ProviderError,
    /// The frame could not be decoded.
    Malformed,
}

/// Routes decoded feed messages into the buffer and the publisher.
pub struct IngestionCoordinator {
    buffer: Arc<PriceBuffer>,
    publisher: Arc<dyn RatePublisherPort>,
    decoder: Arc<dyn FeedDecoderPort>,
    initial_average_delay: Duration,
}

impl IngestionCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        buffer: Arc<PriceBuffer>,
        publisher: Arc<dyn RatePublisherPort>,
        decoder: Arc<dyn FeedDecoderPort>,
        initial_average_delay: Duration,
    ) -> Self {
        Self {
            buffer,
            publisher,
            decoder,
            initial_average_delay,
        }
    }

    /// Handle one raw text frame. Never panics and never returns an error;
    /// malformed frames are logged and counted.
    pub fn handle_text(&self, text: &str) -> IngestOutcome {
        match self.decoder.decode_frame(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed feed frame");
                metrics::record_malformed_message();
                IngestOutcome::Malformed
            }
        }
    }

    /// Handle one decoded message.
    pub fn handle_message(&self, message: FeedMessage) -> IngestOutcome {
        metrics::record_feed_message(message.kind());

        match message {
            FeedMessage::Ping => IngestOutcome::Ignored,
            FeedMessage::Trades(trades) => {
                let count = trades.len();
                for trade in trades {
                    self.ingest_trade(trade);
                }
                IngestOutcome::Ingested(count)
            }
            FeedMessage::Error { message } => {
                tracing::warn!(message = %message, "Feed reported an error");
                IngestOutcome::ProviderError
            }
            FeedMessage::Unknown { kind } => {
                tracing::trace!(kind = %kind, "Ignoring unhandled feed frame");
                IngestOutcome::Ignored
            }
        }
    }

    fn ingest_trade(&self, trade: Trade) {
        let first = self
            .buffer
            .add_sample(&trade.symbol, trade.price, trade.timestamp_millis);
        metrics::record_tick_received(&trade.symbol);

        if first {
            self.schedule_preliminary_average(&trade.symbol);
        }

        self.publisher
            .publish_live_tick(&trade.symbol, trade.price, trade.timestamp_millis);
    }

    fn schedule_preliminary_average(&self, symbol: &str) {
        let buffer = Arc::clone(&self.buffer);
        let publisher = Arc::clone(&self.publisher);
        let key = symbol.to_string();

        let scheduled =
            self.buffer
                .schedule_initial_average(symbol, self.initial_average_delay, move || {
                    if let Some(average) = buffer.average(&key) {
                        tracing::info!(symbol = %key, average, "Publishing preliminary average");
                        publisher.publish_preliminary_average(&key, average);
                    }
                });

        if scheduled {
            tracing::debug!(
                symbol,
                delay_ms = self.initial_average_delay.as_millis(),
                "Scheduled preliminary average"
            );
        }
    }
}

impl std::fmt::Debug for IngestionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionCoordinator")
            .field("buffer", &self.buffer)
            .field("initial_average_delay", &self.initial_average_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{Publication, RecordingRatePublisher};
    use crate::infrastructure::feed::FeedCodec;

    fn coordinator() -> (IngestionCoordinator, Arc<PriceBuffer>, Arc<RecordingRatePublisher>) {
        let buffer = Arc::new(PriceBuffer::new());
        let publisher = Arc::new(RecordingRatePublisher::new());
        let coordinator = IngestionCoordinator::new(
            Arc::clone(&buffer),
            publisher.clone(),
            Arc::new(FeedCodec::new()),
            DEFAULT_INITIAL_AVERAGE_DELAY,
        );
        (coordinator, buffer, publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn trades_are_buffered_and_forwarded() {
        let (coordinator, buffer, publisher) = coordinator();

        let outcome = coordinator.handle_text(
            r#"{"type":"trade","data":[
                {"s":"BINANCE:ETHUSDC","p":1850.5,"t":1000,"v":0.1},
                {"s":"BINANCE:ETHUSDC","p":1860.0,"t":2000,"v":0.2}
            ]}"#,
        );

        assert_eq!(outcome, IngestOutcome::Ingested(2));
        assert_eq!(buffer.sample_count("BINANCE:ETHUSDC"), 2);
        assert_eq!(buffer.average("BINANCE:ETHUSDC"), Some(1855.25));
        assert_eq!(publisher.len(), 2);
        assert!(buffer.has_pending_initial_average("BINANCE:ETHUSDC"));
    }

    #[tokio::test(start_paused = true)]
    async fn preliminary_average_published_after_delay() {
        let (coordinator, _buffer, publisher) = coordinator();

        coordinator.handle_text(r#"{"type":"trade","data":[{"s":"A","p":10.0,"t":1}]}"#);
        coordinator.handle_text(r#"{"type":"trade","data":[{"s":"A","p":20.0,"t":2}]}"#);

        tokio::time::sleep(DEFAULT_INITIAL_AVERAGE_DELAY + Duration::from_millis(10)).await;
        tokio::task::yield_now().await;

        let preliminary: Vec<_> = publisher
            .publications()
            .into_iter()
            .filter(|p| matches!(p, Publication::PreliminaryAverage { .. }))
            .collect();
        assert_eq!(
            preliminary,
            vec![Publication::PreliminaryAverage {
                symbol: "A".to_string(),
                average: 15.0,
            }]
        );
    }

    #[tokio::test]
    async fn ping_and_unknown_change_nothing() {
        let (coordinator, buffer, publisher) = coordinator();

        assert_eq!(coordinator.handle_text(r#"{"type":"ping"}"#), IngestOutcome::Ignored);
        assert_eq!(coordinator.handle_text(r#"{"type":"news","data":[]}"#), IngestOutcome::Ignored);

        assert!(buffer.symbols().is_empty());
        assert!(publisher.is_empty());
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let (coordinator, buffer, publisher) = coordinator();

        assert_eq!(coordinator.handle_text("not json"), IngestOutcome::Malformed);
        assert_eq!(
            coordinator.handle_text(r#"{"type":"trade","data":[{"s":"A"}]}"#),
            IngestOutcome::Malformed
        );

        assert!(buffer.symbols().is_empty());
        assert!(publisher.is_empty());
    }

    #[tokio::test]
    async fn provider_error_is_reported() {
        let (coordinator, buffer, _publisher) = coordinator();
        assert_eq!(
            coordinator.handle_text(r#"{"type":"error","msg":"Invalid token"}"#),
            IngestOutcome::ProviderError
        );
        assert!(buffer.symbols().is_empty());
    }
}
