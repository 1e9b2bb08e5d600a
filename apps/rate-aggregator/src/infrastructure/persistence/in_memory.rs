//! In-memory rate store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{RateStorePort, StoreError};
use crate::domain::{HourlyAverageRecord, NewHourlyAverage};

#[derive(Debug, Default)]
struct Records {
    rows: Vec<HourlyAverageRecord>,
    next_id: i64,
}

/// In-memory implementation of `RateStorePort`.
///
/// Suitable for testing and development. Not for production use.
#[derive(Debug, Default)]
pub struct InMemoryRateStore {
    records: RwLock<Records>,
}

impl InMemoryRateStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().rows.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().rows.is_empty()
    }

    /// All stored records, in insertion order.
    #[must_use]
    pub fn all(&self) -> Vec<HourlyAverageRecord> {
        self.records.read().rows.clone()
    }
}

#[async_trait]
impl RateStorePort for InMemoryRateStore {
    async fn save(&self, record: NewHourlyAverage) -> Result<HourlyAverageRecord, StoreError> {
        let mut records = self.records.write();
        if records
            .rows
            .iter()
            .any(|r| r.symbol == record.symbol && r.hour == record.hour)
        {
            return Err(StoreError::Duplicate {
                symbol: record.symbol,
                hour: record.hour,
            });
        }

        records.next_id += 1;
        let stored = HourlyAverageRecord {
            id: records.next_id,
            symbol: record.symbol,
            average_price: record.average_price,
            hour: record.hour,
            created_at: Utc::now(),
        };
        records.rows.push(stored.clone());
        Ok(stored)
    }

    async fn find_recent(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<HourlyAverageRecord>, StoreError> {
        let records = self.records.read();
        let mut matching: Vec<_> = records
            .rows
            .iter()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.hour.cmp(&a.hour));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.write();
        let before = records.rows.len();
        records.rows.retain(|r| r.hour >= cutoff);
        Ok((before - records.rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use rust_decimal::Decimal;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, hour, 0, 0).unwrap()
    }

    fn new(symbol: &str, hour: u32) -> NewHourlyAverage {
        NewHourlyAverage {
            symbol: symbol.to_string(),
            average_price: Decimal::new(i64::from(hour), 0),
            hour: at(hour),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_symbol_hour() {
        let store = InMemoryRateStore::new();
        store.save(new("A", 1)).await.unwrap();
        store.save(new("B", 1)).await.unwrap();

        let err = store.save(new("A", 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn find_recent_is_newest_first_and_limited() {
        let store = InMemoryRateStore::new();
        for hour in [3, 1, 5, 2, 4] {
            store.save(new("A", hour)).await.unwrap();
        }
        store.save(new("B", 6)).await.unwrap();

        let recent = store.find_recent("A", 3).await.unwrap();
        let hours: Vec<_> = recent.iter().map(|r| r.hour).collect();
        assert_eq!(hours, vec![at(5), at(4), at(3)]);
    }

    #[tokio::test]
    async fn delete_older_than_is_exclusive() {
        let store = InMemoryRateStore::new();
        for hour in [1, 2, 3] {
            store.save(new("A", hour)).await.unwrap();
        }

        let deleted = store.delete_older_than(at(2)).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.find_recent("A", 10).await.unwrap().len(), 2);

        let deleted = store.delete_older_than(at(3) + TimeDelta::hours(1)).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(store.is_empty());
    }
}
