//! Persistence Cycle
//!
//! Hourly: store one average per buffered symbol and release only the
//! samples that made it into a stored average. Daily: delete records that
//! fell out of the retention window.
//!
//! A failure for one symbol never affects another. A symbol whose save
//! fails keeps its samples and is retried on the next cycle.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::application::ports::{RatePublisherPort, RateStorePort};
use crate::domain::{NewHourlyAverage, PriceBuffer, aggregation};
use crate::infrastructure::metrics;

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// Outcome of one hourly cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Symbols whose average was stored and whose samples were released.
    pub persisted: Vec<String>,
    /// Symbols whose save failed; their samples are retained.
    pub failed: Vec<String>,
    /// Symbols that had nothing to average by the time they were read.
    pub skipped: Vec<String>,
}

impl CycleReport {
    /// Whether every buffered symbol was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives hourly persistence and retention cleanup.
pub struct PersistenceCycle {
    buffer: Arc<PriceBuffer>,
    store: Arc<dyn RateStorePort>,
    publisher: Arc<dyn RatePublisherPort>,
    retention_days: u32,
}

impl PersistenceCycle {
    /// Create a persistence cycle.
    #[must_use]
    pub fn new(
        buffer: Arc<PriceBuffer>,
        store: Arc<dyn RateStorePort>,
        publisher: Arc<dyn RatePublisherPort>,
        retention_days: u32,
    ) -> Self {
        Self {
            buffer,
            store,
            publisher,
            retention_days,
        }
    }

    /// Run the hourly cycle for the current hour.
    pub async fn run_hourly(&self) -> CycleReport {
        self.run_hourly_at(Utc::now()).await
    }

    /// Run the hourly cycle, stamping records with the hour of `now`.
    #[tracing::instrument(skip(self), fields(hour = tracing::field::Empty))]
    pub async fn run_hourly_at(&self, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let hour = aggregation::round_to_hour(now);
        tracing::Span::current().record("hour", tracing::field::display(hour));

        let mut report = CycleReport::default();
        let mut released = Vec::new();

        for symbol in self.buffer.symbols() {
            let Some(samples) = self.buffer.samples(&symbol) else {
                report.skipped.push(symbol);
                continue;
            };
            let Some(average) = aggregation::average(&samples) else {
                report.skipped.push(symbol);
                continue;
            };
            let Some(record) = NewHourlyAverage::from_average(symbol.as_str(), average, hour) else {
                tracing::error!(symbol = %symbol, average, "Average has no decimal representation");
                metrics::record_persistence_failure(&symbol);
                report.failed.push(symbol);
                continue;
            };

            match self.store.save(record).await {
                Ok(saved) => {
                    tracing::info!(
                        symbol = %symbol,
                        average = %format!("{average:.8}"),
                        samples = samples.len(),
                        id = saved.id,
                        "Saved hourly average"
                    );
                    metrics::record_average_persisted(&symbol);
                    self.publisher.publish_hourly_average(&symbol).await;
                    released.push((symbol.clone(), samples.len()));
                    report.persisted.push(symbol);
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "Failed to save hourly average");
                    metrics::record_persistence_failure(&symbol);
                    report.failed.push(symbol);
                }
            }
        }

        for (symbol, count) in released {
            self.buffer.drain_persisted(&symbol, count);
        }

        metrics::set_buffered_symbols(self.buffer.symbols().len());
        metrics::record_persistence_cycle_duration(started.elapsed());

        if !report.failed.is_empty() {
            tracing::warn!(
                failed = ?report.failed,
                "Hourly cycle incomplete, failed symbols keep their samples"
            );
        }

        report
    }

    /// Delete records older than the retention window.
    ///
    /// Returns the number of deleted records, or `None` if the delete
    /// failed.
    pub async fn run_retention(&self) -> Option<u64> {
        self.run_retention_at(Utc::now()).await
    }

    /// Delete records older than the retention window measured from `now`.
    pub async fn run_retention_at(&self, now: DateTime<Utc>) -> Option<u64> {
        let cutoff = aggregation::days_ago_from(now, self.retention_days);

        match self.store.delete_older_than(cutoff).await {
            Ok(deleted) => {
                tracing::info!(deleted, cutoff = %cutoff, "Cleaned up old hourly averages");
                metrics::record_retention_deleted(deleted);
                Some(deleted)
            }
            Err(e) => {
                tracing::error!(error = %e, cutoff = %cutoff, "Retention cleanup failed");
                metrics::record_retention_failure();
                None
            }
        }
    }
}

impl std::fmt::Debug for PersistenceCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCycle")
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}
