//! Finnhub Feed Adapters
//!
//! - **client**: self-healing WebSocket connection
//! - **codec**: JSON frames to domain messages
//! - **reconnect**: bounded exponential backoff
//! - **session**: subscription replay on every open

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod session;

pub use client::{
    ConnectionState, StreamClient, StreamClientConfig, StreamClientError, WeakStreamClient,
};
pub use codec::{CodecError, FeedCodec};
pub use messages::{RawTrade, SubscriptionAction, SubscriptionRequest};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use session::FeedSession;
