//! Feed Session
//!
//! Binds the stream client to the ingestion coordinator and keeps the
//! subscription set in sync with the connection: every time a connection
//! opens, each configured symbol is subscribed again.

use std::sync::Arc;

use super::client::{StreamClient, StreamClientError};
use super::codec::FeedCodec;
use super::messages::{SubscriptionAction, SubscriptionRequest};
use crate::application::services::IngestionCoordinator;
use crate::infrastructure::config::redact_url;

/// A stream client subscribed to a fixed symbol set.
#[derive(Debug)]
pub struct FeedSession {
    client: StreamClient,
    codec: FeedCodec,
    url: String,
    symbols: Arc<[String]>,
}

impl FeedSession {
    /// Create a session for `symbols` on the feed at `url`.
    #[must_use]
    pub fn new(client: StreamClient, url: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            client,
            codec: FeedCodec::new(),
            url: url.into(),
            symbols: Arc::from(symbols),
        }
    }

    /// Register the client handlers.
    ///
    /// Inbound frames go to `coordinator`; each open replays the
    /// subscriptions.
    pub fn attach(&self, coordinator: Arc<IngestionCoordinator>) {
        let weak = self.client.downgrade();
        let codec = self.codec;
        let symbols = Arc::clone(&self.symbols);
        self.client.on_open(move || {
            if let Some(client) = weak.upgrade() {
                let sent = send_all(&client, codec, &symbols, SubscriptionAction::Subscribe);
                tracing::info!(subscribed = sent, total = symbols.len(), "Subscribed to feed symbols");
            }
        });

        self.client.on_message(move |text| {
            coordinator.handle_text(text);
        });

        self.client.on_error(|error| match error {
            StreamClientError::ReconnectExhausted { attempts } => {
                tracing::error!(attempts, "Feed is down and will not be retried");
            }
            StreamClientError::WebSocket(e) => {
                tracing::warn!(error = %e, "Feed transport error");
            }
        });

        self.client.on_close(|| {
            tracing::warn!("Feed connection lost");
        });
    }

    /// Open the connection.
    pub fn start(&self) {
        tracing::info!(url = %redact_url(&self.url), symbols = ?self.symbols, "Starting feed session");
        self.client.connect(&self.url);
    }

    /// Send a subscribe frame for every symbol. Returns the number sent.
    pub fn subscribe_all(&self) -> usize {
        send_all(&self.client, self.codec, &self.symbols, SubscriptionAction::Subscribe)
    }

    /// Send an unsubscribe frame for every symbol. Returns the number sent.
    pub fn unsubscribe_all(&self) -> usize {
        send_all(&self.client, self.codec, &self.symbols, SubscriptionAction::Unsubscribe)
    }

    /// Unsubscribe every symbol, then close without reconnecting.
    pub async fn stop(&self) {
        let sent = self.unsubscribe_all();
        tracing::info!(unsubscribed = sent, "Stopping feed session");
        self.client.shutdown().await;
    }

    /// The underlying client.
    #[must_use]
    pub const fn client(&self) -> &StreamClient {
        &self.client
    }

    /// Subscribed symbols.
    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

fn send_all(
    client: &StreamClient,
    codec: FeedCodec,
    symbols: &[String],
    action: SubscriptionAction,
) -> usize {
    symbols
        .iter()
        .filter(|symbol| {
            let request = SubscriptionRequest {
                action,
                symbol: (*symbol).clone(),
            };
            match codec.encode_subscription(&request) {
                Ok(frame) => client.send(&frame),
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Failed to encode subscription");
                    false
                }
            }
        })
        .count()
}
