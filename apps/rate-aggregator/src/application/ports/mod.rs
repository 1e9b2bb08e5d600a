//! Application Ports (Driven)
//!
//! Interfaces the services use to reach the outside world:
//! - **Rate store**: durable hourly averages
//! - **Rate publisher**: fan-out to downstream subscribers
//! - **Feed decoder**: wire frames to domain messages

mod feed_decoder_port;
mod rate_publisher_port;
mod rate_store_port;

pub use feed_decoder_port::{FeedDecodeError, FeedDecoderPort};
pub use rate_publisher_port::{
    NoOpRatePublisher, Publication, RatePublisherPort, RecordingRatePublisher,
};
#[cfg(test)]
pub use rate_store_port::MockRateStorePort;
pub use rate_store_port::{RateStorePort, StoreError};
