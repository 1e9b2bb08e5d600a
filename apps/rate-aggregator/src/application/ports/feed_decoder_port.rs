//! Feed Decoder Port
//!
//! Turns a raw text frame from the market-data feed into a [`FeedMessage`].

use crate::domain::FeedMessage;

/// Frame decoding error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedDecodeError {
    /// The frame is not a message this feed can produce.
    #[error("malformed feed frame: {message}")]
    Malformed {
        /// Why decoding failed.
        message: String,
    },
}

/// Port for decoding inbound feed frames.
pub trait FeedDecoderPort: Send + Sync {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FeedDecodeError::Malformed`] when the frame cannot be
    /// parsed.
    fn decode_frame(&self, text: &str) -> Result<FeedMessage, FeedDecodeError>;
}
