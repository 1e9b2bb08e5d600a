//! Feed Codec
//!
//! JSON encoding and decoding for the Finnhub trade stream. Frames are
//! decoded into a raw value first and dispatched on their `type` field so
//! unknown frame types stay distinguishable from malformed ones.

use serde_json::Value;

use super::messages::{ErrorFrame, RawTrade, SubscriptionRequest, TradeFrame};
use crate::application::ports::{FeedDecodeError, FeedDecoderPort};
use crate::domain::FeedMessage;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the Finnhub trade stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a string
    /// `type` field, or if a known frame type has an invalid body.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let value: Value = serde_json::from_str(trimmed)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::InvalidFormat("missing \"type\" field".to_string()))?
            .to_string();

        match kind.as_str() {
            "ping" => Ok(FeedMessage::Ping),
            "trade" => {
                let frame: TradeFrame = serde_json::from_value(value)?;
                Ok(FeedMessage::Trades(
                    frame.data.into_iter().map(RawTrade::into_trade).collect(),
                ))
            }
            "error" => {
                let frame: ErrorFrame = serde_json::from_value(value)?;
                Ok(FeedMessage::Error { message: frame.msg })
            }
            _ => Ok(FeedMessage::Unknown { kind }),
        }
    }

    /// Encode an outbound subscription frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode_subscription(&self, request: &SubscriptionRequest) -> Result<String, CodecError> {
        Ok(serde_json::to_string(request)?)
    }
}

impl FeedDecoderPort for FeedCodec {
    fn decode_frame(&self, text: &str) -> Result<FeedMessage, FeedDecodeError> {
        self.decode(text).map_err(|e| FeedDecodeError::Malformed {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Trade;

    #[test]
    fn decodes_trade_frame() {
        let codec = FeedCodec::new();
        let msg = codec
            .decode(r#"{"type":"trade","data":[{"s":"BINANCE:ETHUSDT","p":1850.5,"t":1700000000000,"v":0.12,"c":null}]}"#)
            .unwrap();

        assert_eq!(
            msg,
            FeedMessage::Trades(vec![
                Trade::new("BINANCE:ETHUSDT", 1850.5, 1_700_000_000_000).with_volume(0.12)
            ])
        );
    }

    #[test]
    fn trade_frame_without_data_is_empty() {
        let msg = FeedCodec::new().decode(r#"{"type":"trade"}"#).unwrap();
        assert_eq!(msg, FeedMessage::Trades(Vec::new()));
    }

    #[test]
    fn decodes_ping() {
        assert_eq!(FeedCodec::new().decode(r#" {"type":"ping"} "#).unwrap(), FeedMessage::Ping);
    }

    #[test]
    fn decodes_provider_error() {
        let msg = FeedCodec::new()
            .decode(r#"{"type":"error","msg":"Subscribing to too many symbols"}"#)
            .unwrap();
        assert_eq!(
            msg,
            FeedMessage::Error {
                message: "Subscribing to too many symbols".to_string()
            }
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let msg = FeedCodec::new().decode(r#"{"type":"news","data":[]}"#).unwrap();
        assert_eq!(
            msg,
            FeedMessage::Unknown {
                kind: "news".to_string()
            }
        );
    }

    #[test]
    fn rejects_non_object_frames() {
        let codec = FeedCodec::new();
        assert!(matches!(codec.decode("[1,2]"), Err(CodecError::InvalidFormat(_))));
        assert!(matches!(codec.decode("ünïcødé ".repeat(20).as_str()), Err(CodecError::InvalidFormat(_))));
    }

    #[test]
    fn rejects_missing_type() {
        assert!(matches!(
            FeedCodec::new().decode(r#"{"data":[]}"#),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_trade_with_missing_price() {
        assert!(matches!(
            FeedCodec::new().decode(r#"{"type":"trade","data":[{"s":"X","t":1}]}"#),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn port_maps_errors_to_malformed() {
        let err = FeedCodec::new().decode_frame("{").unwrap_err();
        assert!(matches!(err, FeedDecodeError::Malformed { .. }));
    }
}
