//! Feed Messages
//!
//! Decoded form of an inbound market-data frame, independent of the wire
//! encoding.

use super::trade::Trade;

/// A decoded feed frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Keep-alive. Carries no data.
    Ping,
    /// One or more executed trades.
    Trades(Vec<Trade>),
    /// Error reported by the feed provider.
    Error {
        /// Provider message.
        message: String,
    },
    /// A frame type this service does not consume.
    Unknown {
        /// The reported frame type.
        kind: String,
    },
}

impl FeedMessage {
    /// Short label used for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Trades(_) => "trade",
            Self::Error { .. } => "error",
            Self::Unknown { .. } => "unknown",
        }
    }
}
