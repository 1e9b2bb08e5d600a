//! Finnhub Wire Messages
//!
//! JSON shapes exchanged with the Finnhub trade stream.
//!
//! Inbound frames carry a `type` discriminator:
//!
//! ```json
//! {"type":"ping"}
//! {"type":"trade","data":[{"s":"BINANCE:ETHUSDT","p":1850.5,"t":1700000000000,"v":0.12}]}
//! {"type":"error","msg":"Invalid API key"}
//! ```
//!
//! Outbound frames manage subscriptions:
//!
//! ```json
//! {"type":"subscribe","symbol":"BINANCE:ETHUSDT"}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::Trade;

/// A trade entry inside a `trade` frame.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RawTrade {
    /// Symbol.
    pub s: String,
    /// Price.
    pub p: f64,
    /// Timestamp in Unix milliseconds.
    pub t: i64,
    /// Volume.
    #[serde(default)]
    pub v: Option<f64>,
}

impl RawTrade {
    /// Convert to a domain trade.
    #[must_use]
    pub fn into_trade(self) -> Trade {
        let trade = Trade::new(self.s, self.p, self.t);
        match self.v {
            Some(volume) => trade.with_volume(volume),
            None => trade,
        }
    }
}

/// Body of a `trade` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeFrame {
    /// Trades in this frame.
    #[serde(default)]
    pub data: Vec<RawTrade>,
}

/// Body of an `error` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorFrame {
    /// Provider message.
    #[serde(default)]
    pub msg: String,
}

/// Subscription action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start receiving trades for a symbol.
    Subscribe,
    /// Stop receiving trades for a symbol.
    Unsubscribe,
}

/// Outbound subscription frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Action to take.
    #[serde(rename = "type")]
    pub action: SubscriptionAction,
    /// Symbol the action applies to.
    pub symbol: String,
}

impl SubscriptionRequest {
    /// Subscribe to `symbol`.
    #[must_use]
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self {
            action: SubscriptionAction::Subscribe,
            symbol: symbol.into(),
        }
    }

    /// Unsubscribe from `symbol`.
    #[must_use]
    pub fn unsubscribe(symbol: impl Into<String>) -> Self {
        Self {
            action: SubscriptionAction::Unsubscribe,
            symbol: symbol.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_wire_format() {
        let json = serde_json::to_string(&SubscriptionRequest::subscribe("BINANCE:ETHBTC")).unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"BINANCE:ETHBTC"}"#);
    }

    #[test]
    fn unsubscribe_request_wire_format() {
        let json = serde_json::to_string(&SubscriptionRequest::unsubscribe("BINANCE:ETHBTC")).unwrap();
        assert_eq!(json, r#"{"type":"unsubscribe","symbol":"BINANCE:ETHBTC"}"#);
    }

    #[test]
    fn raw_trade_without_volume() {
        let raw: RawTrade = serde_json::from_str(r#"{"s":"X","p":1.5,"t":10}"#).unwrap();
        let trade = raw.into_trade();
        assert_eq!(trade.volume, None);
        assert_eq!(trade.timestamp_millis, 10);
    }
}
