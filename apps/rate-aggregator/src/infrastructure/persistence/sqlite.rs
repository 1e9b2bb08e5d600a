//! SQLite Rate Store
//!
//! Durable storage for hourly averages in a single `hourly_rates` table.
//! Prices are stored as decimal strings so no precision is lost; instants
//! are stored as Unix milliseconds.
//!
//! The connection sits behind a mutex and every query runs on the blocking
//! pool, so callers on the async runtime never wait on disk I/O.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, params};
use rust_decimal::Decimal;

use crate::application::ports::{RateStorePort, StoreError};
use crate::domain::{HourlyAverageRecord, NewHourlyAverage};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hourly_rates (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol        TEXT    NOT NULL,
    average_price TEXT    NOT NULL,
    hour          INTEGER NOT NULL,
    created_at    INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_hourly_rates_symbol_hour
    ON hourly_rates (symbol, hour);
";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::QueryFailed {
            message: e.to_string(),
        }
    }
}

/// SQLite implementation of `RateStorePort`.
#[derive(Debug, Clone)]
pub struct SqliteRateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRateStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot
    /// be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(|e| StoreError::Unavailable {
            message: format!("{}: {e}", path.as_ref().display()),
        })?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::initialize(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Unavailable {
            message: e.to_string(),
        })?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        tracing::debug!("Rate store schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable {
            message: format!("store task failed: {e}"),
        })?
    }
}

#[async_trait]
impl RateStorePort for SqliteRateStore {
    async fn save(&self, record: NewHourlyAverage) -> Result<HourlyAverageRecord, StoreError> {
        self.with_conn(move |conn| {
            let created_at = truncate_to_millis(Utc::now());
            let inserted = conn.execute(
                "INSERT INTO hourly_rates (symbol, average_price, hour, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.symbol,
                    record.average_price.to_string(),
                    record.hour.timestamp_millis(),
                    created_at.timestamp_millis(),
                ],
            );

            match inserted {
                Ok(_) => Ok(HourlyAverageRecord {
                    id: conn.last_insert_rowid(),
                    symbol: record.symbol,
                    average_price: record.average_price,
                    hour: record.hour,
                    created_at,
                }),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate {
                        symbol: record.symbol,
                        hour: record.hour,
                    })
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn find_recent(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<HourlyAverageRecord>, StoreError> {
        let symbol = symbol.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, symbol, average_price, hour, created_at
                 FROM hourly_rates
                 WHERE symbol = ?1
                 ORDER BY hour DESC
                 LIMIT ?2",
            )?;

            let rows = stmt.query_map(params![symbol, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, symbol, price, hour, created_at) = row?;
                records.push(HourlyAverageRecord {
                    id,
                    average_price: Decimal::from_str(&price).map_err(|e| {
                        StoreError::CorruptRecord {
                            message: format!("row {id}: average_price {price:?}: {e}"),
                        }
                    })?,
                    hour: from_millis(id, hour)?,
                    created_at: from_millis(id, created_at)?,
                    symbol,
                });
            }
            Ok(records)
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM hourly_rates WHERE hour < ?1",
                params![cutoff.timestamp_millis()],
            )?;
            Ok(deleted as u64)
        })
        .await
    }
}

fn from_millis(id: i64, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::CorruptRecord {
        message: format!("row {id}: timestamp {millis} out of range"),
    })
}

fn truncate_to_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn new(symbol: &str, day: u32, hour: u32, price: &str) -> NewHourlyAverage {
        NewHourlyAverage {
            symbol: symbol.to_string(),
            average_price: Decimal::from_str(price).unwrap(),
            hour: at(day, hour),
        }
    }

    #[tokio::test]
    async fn save_and_read_back_exact_price() {
        let store = SqliteRateStore::open_in_memory().unwrap();
        let saved = store
            .save(new("BINANCE:ETHBTC", 17, 14, "0.05312346"))
            .await
            .unwrap();

        let recent = store.find_recent("BINANCE:ETHBTC", 24).await.unwrap();
        assert_eq!(recent, vec![saved]);
        assert_eq!(recent[0].average_price.to_string(), "0.05312346");
    }

    #[tokio::test]
    async fn unique_symbol_hour() {
        let store = SqliteRateStore::open_in_memory().unwrap();
        store.save(new("A", 17, 14, "1")).await.unwrap();
        store.save(new("B", 17, 14, "1")).await.unwrap();

        let err = store.save(new("A", 17, 14, "2")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { ref symbol, .. } if symbol == "A"));
    }

    #[tokio::test]
    async fn find_recent_orders_by_hour_desc() {
        let store = SqliteRateStore::open_in_memory().unwrap();
        for hour in [10, 12, 11, 9] {
            store.save(new("A", 17, hour, "1")).await.unwrap();
        }

        let hours: Vec<_> = store
            .find_recent("A", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.hour)
            .collect();
        assert_eq!(hours, vec![at(17, 12), at(17, 11)]);
    }

    #[tokio::test]
    async fn delete_older_than_counts_rows() {
        let store = SqliteRateStore::open_in_memory().unwrap();
        store.save(new("A", 1, 0, "1")).await.unwrap();
        store.save(new("A", 9, 0, "1")).await.unwrap();
        store.save(new("B", 2, 0, "1")).await.unwrap();

        let deleted = store.delete_older_than(at(8, 0)).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.find_recent("A", 24).await.unwrap().len(), 1);
        assert!(store.find_recent("B", 24).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rates.db");

        {
            let store = SqliteRateStore::open(&path).unwrap();
            store.save(new("A", 17, 14, "1855.25")).await.unwrap();
        }

        let reopened = SqliteRateStore::open(&path).unwrap();
        let recent = reopened.find_recent("A", 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].average_price, Decimal::new(185_525, 2));
    }
}
