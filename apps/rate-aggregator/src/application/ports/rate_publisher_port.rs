//! Rate Publisher Port (Driven Port)
//!
//! Interface for pushing rate updates to downstream subscribers. Delivery
//! is best-effort; publishing never fails from the caller's point of view.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{HourlyAverageRecord, SubscriberId};

/// Port for publishing rate updates.
#[async_trait]
pub trait RatePublisherPort: Send + Sync {
    /// Forward a live trade price.
    fn publish_live_tick(&self, symbol: &str, price: f64, timestamp_millis: i64);

    /// Publish the preliminary average computed shortly after a symbol's
    /// first tick.
    fn publish_preliminary_average(&self, symbol: &str, average: f64);

    /// Publish the latest stored hourly average for `symbol`.
    ///
    /// Implementations re-read the store so subscribers see the persisted
    /// value.
    async fn publish_hourly_average(&self, symbol: &str);

    /// Send recent averages to a single subscriber.
    fn publish_initial_snapshot(
        &self,
        subscriber: SubscriberId,
        symbol: &str,
        averages: Vec<HourlyAverageRecord>,
    );
}

/// Publisher that drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoOpRatePublisher;

#[async_trait]
impl RatePublisherPort for NoOpRatePublisher {
    fn publish_live_tick(&self, _symbol: &str, _price: f64, _timestamp_millis: i64) {}

    fn publish_preliminary_average(&self, _symbol: &str, _average: f64) {}

    async fn publish_hourly_average(&self, _symbol: &str) {}

    fn publish_initial_snapshot(
        &self,
        _subscriber: SubscriberId,
        _symbol: &str,
        _averages: Vec<HourlyAverageRecord>,
    ) {
    }
}

/// A call made against a [`RecordingRatePublisher`].
#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    /// `publish_live_tick`.
    LiveTick {
        /// Instrument identifier.
        symbol: String,
        /// Trade price.
        price: f64,
        /// Trade time in Unix milliseconds.
        timestamp_millis: i64,
    },
    /// `publish_preliminary_average`.
    PreliminaryAverage {
        /// Instrument identifier.
        symbol: String,
        /// Published average.
        average: f64,
    },
    /// `publish_hourly_average`.
    HourlyAverage {
        /// Instrument identifier.
        symbol: String,
    },
    /// `publish_initial_snapshot`.
    InitialSnapshot {
        /// Receiving subscriber.
        subscriber: SubscriberId,
        /// Instrument identifier.
        symbol: String,
        /// Number of averages sent.
        averages: usize,
    },
}

/// Publisher that records every call, for tests.
#[derive(Debug, Default)]
pub struct RecordingRatePublisher {
    publications: Mutex<Vec<Publication>>,
}

impl RecordingRatePublisher {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn publications(&self) -> Vec<Publication> {
        self.publications.lock().clone()
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.publications.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publications.lock().is_empty()
    }

    fn record(&self, publication: Publication) {
        self.publications.lock().push(publication);
    }
}

#[async_trait]
impl RatePublisherPort for RecordingRatePublisher {
    fn publish_live_tick(&self, symbol: &str, price: f64, timestamp_millis: i64) {
        self.record(Publication::LiveTick {
            symbol: symbol.to_string(),
            price,
            timestamp_millis,
        });
    }

    fn publish_preliminary_average(&self, symbol: &str, average: f64) {
        self.record(Publication::PreliminaryAverage {
            symbol: symbol.to_string(),
            average,
        });
    }

    async fn publish_hourly_average(&self, symbol: &str) {
        self.record(Publication::HourlyAverage {
            symbol: symbol.to_string(),
        });
    }

    fn publish_initial_snapshot(
        &self,
        subscriber: SubscriberId,
        symbol: &str,
        averages: Vec<HourlyAverageRecord>,
    ) {
        self.record(Publication::InitialSnapshot {
            subscriber,
            symbol: symbol.to_string(),
            averages: averages.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_publisher_keeps_call_order() {
        let publisher = RecordingRatePublisher::new();
        publisher.publish_live_tick("A", 1.0, 10);
        publisher.publish_preliminary_average("A", 1.0);
        publisher.publish_hourly_average("A").await;

        assert_eq!(
            publisher.publications(),
            vec![
                Publication::LiveTick {
                    symbol: "A".to_string(),
                    price: 1.0,
                    timestamp_millis: 10,
                },
                Publication::PreliminaryAverage {
                    symbol: "A".to_string(),
                    average: 1.0,
                },
                Publication::HourlyAverage {
                    symbol: "A".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn no_op_publisher_accepts_everything() {
        let publisher = NoOpRatePublisher;
        publisher.publish_live_tick("A", 1.0, 10);
        publisher.publish_hourly_average("A").await;
        publisher.publish_initial_snapshot(SubscriberId::new(), "A", Vec::new());
    }
}
