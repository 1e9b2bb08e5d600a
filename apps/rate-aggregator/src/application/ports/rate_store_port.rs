//! Rate Store Port (Driven Port)
//!
//! Durable storage for hourly averages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{HourlyAverageRecord, NewHourlyAverage};

/// Rate store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// A record for the same symbol and hour already exists.
    #[error("hourly average for {symbol} at {hour} already stored")]
    Duplicate {
        /// Instrument identifier.
        symbol: String,
        /// Hour of the conflicting record.
        hour: DateTime<Utc>,
    },

    /// The store could not be reached.
    #[error("rate store unavailable: {message}")]
    Unavailable {
        /// Underlying connection or driver error.
        message: String,
    },

    /// A query failed.
    #[error("rate store query failed: {message}")]
    QueryFailed {
        /// Error reported by the store.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt rate record: {message}")]
    CorruptRecord {
        /// What could not be decoded.
        message: String,
    },
}

/// Port for storing and reading hourly averages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateStorePort: Send + Sync {
    /// Store a new hourly average.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if `(symbol, hour)` is already
    /// stored, or another variant if the write fails.
    async fn save(&self, record: NewHourlyAverage) -> Result<HourlyAverageRecord, StoreError>;

    /// Most recent averages for `symbol`, newest hour first.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn find_recent(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<HourlyAverageRecord>, StoreError>;

    /// Delete every record whose hour is before `cutoff`.
    ///
    /// Returns the number of deleted records.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
