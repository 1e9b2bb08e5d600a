//! Trades and Hourly Records
//!
//! Value types that move from the feed into the price buffer and from the
//! persistence cycle into the rate store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Number of decimal places kept for stored averages.
pub const AVERAGE_PRICE_SCALE: u32 = 8;

/// A single executed trade reported by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Instrument identifier, e.g. `BINANCE:ETHUSDT`.
    pub symbol: String,
    /// Last traded price.
    pub price: f64,
    /// Exchange timestamp in Unix milliseconds.
    pub timestamp_millis: i64,
    /// Traded volume, when the feed reports it.
    pub volume: Option<f64>,
}

impl Trade {
    /// Create a trade without volume.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, timestamp_millis: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp_millis,
            volume: None,
        }
    }

    /// Attach a traded volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// One price observation held by the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Observed price.
    pub price: f64,
    /// Observation time in Unix milliseconds.
    pub timestamp_millis: i64,
}

impl PriceSample {
    /// Create a sample.
    #[must_use]
    pub const fn new(price: f64, timestamp_millis: i64) -> Self {
        Self {
            price,
            timestamp_millis,
        }
    }
}

/// An hourly average that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHourlyAverage {
    /// Instrument identifier.
    pub symbol: String,
    /// Average price, scaled to [`AVERAGE_PRICE_SCALE`] places.
    pub average_price: Decimal,
    /// Start of the hour the average belongs to.
    pub hour: DateTime<Utc>,
}

impl NewHourlyAverage {
    /// Build a record from a floating-point average.
    ///
    /// Returns `None` when the average has no decimal representation
    /// (NaN, infinities, or values beyond the decimal range).
    #[must_use]
    pub fn from_average(symbol: impl Into<String>, average: f64, hour: DateTime<Utc>) -> Option<Self> {
        let average_price = Decimal::from_f64(average)?.round_dp(AVERAGE_PRICE_SCALE);
        Some(Self {
            symbol: symbol.into(),
            average_price,
            hour,
        })
    }
}

/// A stored hourly average. Unique on `(symbol, hour)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyAverageRecord {
    /// Store-assigned identifier.
    pub id: i64,
    /// Instrument identifier.
    pub symbol: String,
    /// Average price with eight decimal places.
    pub average_price: Decimal,
    /// Start of the hour the average belongs to.
    pub hour: DateTime<Utc>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}
