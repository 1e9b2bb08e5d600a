//! Domain Layer - Price samples, aggregation arithmetic and events.
//!
//! Nothing in this layer performs I/O. Timers in [`buffer`] are the one
//! place the domain touches the runtime, and only through cancellable
//! task handles.

pub mod aggregation;
pub mod buffer;
pub mod events;
pub mod feed;
pub mod trade;

pub use aggregation::{average, days_ago, days_ago_from, round_to_hour};
pub use buffer::PriceBuffer;
pub use events::{
    InitialSnapshot, LiveTick, PreliminaryAverage, RateEvent, SubscriberId,
};
pub use feed::FeedMessage;
pub use trade::{HourlyAverageRecord, NewHourlyAverage, PriceSample, Trade};
