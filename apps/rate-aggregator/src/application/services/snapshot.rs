//! Initial Snapshot Service
//!
//! Sends a newly attached subscriber the recent hourly averages for every
//! tracked symbol, so it does not have to wait for the next hourly cycle.

use std::sync::Arc;

use crate::application::ports::{RatePublisherPort, RateStorePort};
use crate::domain::SubscriberId;

/// Default number of hourly averages sent per symbol.
pub const DEFAULT_SNAPSHOT_HOURS: usize = 24;

/// Delivers initial snapshots on subscriber attach.
pub struct InitialSnapshotService {
    store: Arc<dyn RateStorePort>,
    publisher: Arc<dyn RatePublisherPort>,
    symbols: Vec<String>,
    depth: usize,
}

impl InitialSnapshotService {
    /// Create a snapshot service for `symbols`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RateStorePort>,
        publisher: Arc<dyn RatePublisherPort>,
        symbols: Vec<String>,
        depth: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            symbols,
            depth,
        }
    }

    /// Send recent averages for every symbol that has any.
    ///
    /// Returns the number of symbols delivered. Store errors are logged and
    /// the symbol is skipped.
    pub async fn deliver(&self, subscriber: SubscriberId) -> usize {
        let mut delivered = 0;

        for symbol in &self.symbols {
            match self.store.find_recent(symbol, self.depth).await {
                Ok(averages) if averages.is_empty() => {}
                Ok(averages) => {
                    self.publisher
                        .publish_initial_snapshot(subscriber, symbol, averages);
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        subscriber = %subscriber,
                        symbol = %symbol,
                        error = %e,
                        "Failed to load initial snapshot"
                    );
                }
            }
        }

        tracing::debug!(subscriber = %subscriber, delivered, "Initial snapshot sent");
        delivered
    }
}

impl std::fmt::Debug for InitialSnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitialSnapshotService")
            .field("symbols", &self.symbols)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{
        MockRateStorePort, Publication, RecordingRatePublisher, StoreError,
    };
    use crate::domain::HourlyAverageRecord;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn record(symbol: &str) -> HourlyAverageRecord {
        HourlyAverageRecord {
            id: 7,
            symbol: symbol.to_string(),
            average_price: Decimal::new(1, 0),
            hour: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn only_symbols_with_history_are_sent() {
        let mut store = MockRateStorePort::new();
        store
            .expect_find_recent()
            .withf(|symbol, limit| symbol == "A" && *limit == DEFAULT_SNAPSHOT_HOURS)
            .returning(|symbol, _| Ok(vec![record(symbol), record(symbol)]));
        store
            .expect_find_recent()
            .withf(|symbol, _| symbol == "B")
            .returning(|_, _| Ok(Vec::new()));
        store
            .expect_find_recent()
            .withf(|symbol, _| symbol == "C")
            .returning(|_, _| {
                Err(StoreError::Unavailable {
                    message: "closed".to_string(),
                })
            });

        let publisher = Arc::new(RecordingRatePublisher::new());
        let service = InitialSnapshotService::new(
            Arc::new(store),
            publisher.clone(),
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            DEFAULT_SNAPSHOT_HOURS,
        );

        let subscriber = SubscriberId::new();
        assert_eq!(service.deliver(subscriber).await, 1);
        assert_eq!(
            publisher.publications(),
            vec![Publication::InitialSnapshot {
                subscriber,
                symbol: "A".to_string(),
                averages: 2,
            }]
        );
    }
}
