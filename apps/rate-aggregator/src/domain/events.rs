//! Rate Events
//!
//! Events published to downstream subscribers. Event names match the
//! channel names subscribers listen on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::trade::HourlyAverageRecord;

/// Identifier of an attached subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live trade price forwarded as it arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTick {
    /// Instrument identifier.
    pub symbol: String,
    /// Trade price.
    pub price: f64,
    /// Trade time in Unix milliseconds.
    pub timestamp: i64,
}

/// The first average computed for a symbol shortly after its first tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreliminaryAverage {
    /// Instrument identifier.
    pub symbol: String,
    /// Average of the samples buffered so far.
    pub average_price: f64,
    /// Emission time.
    pub hour: DateTime<Utc>,
}

/// Recent hourly averages sent to a newly attached subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialSnapshot {
    /// Instrument identifier.
    pub symbol: String,
    /// Stored averages, newest first.
    pub averages: Vec<HourlyAverageRecord>,
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RateEvent {
    /// Throttled live trade price.
    #[serde(rename = "price:update")]
    PriceUpdate(LiveTick),
    /// Preliminary average after a symbol's first tick.
    #[serde(rename = "hourly-average")]
    PreliminaryAverage(PreliminaryAverage),
    /// Latest stored hourly average.
    #[serde(rename = "hourly:average")]
    HourlyAverage(HourlyAverageRecord),
    /// Snapshot of recent averages for one subscriber.
    #[serde(rename = "initial:data")]
    InitialData(InitialSnapshot),
}

impl RateEvent {
    /// Channel name the event is published on.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PriceUpdate(_) => "price:update",
            Self::PreliminaryAverage(_) => "hourly-average",
            Self::HourlyAverage(_) => "hourly:average",
            Self::InitialData(_) => "initial:data",
        }
    }

    /// Instrument the event refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::PriceUpdate(tick) => &tick.symbol,
            Self::PreliminaryAverage(avg) => &avg.symbol,
            Self::HourlyAverage(record) => &record.symbol,
            Self::InitialData(snapshot) => &snapshot.symbol,
        }
    }
}
