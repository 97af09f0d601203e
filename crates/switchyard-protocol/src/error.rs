//! Protocol errors.

use thiserror::Error;

use crate::wire::MAX_FRAME_SIZE;

/// Errors raised while converting messages or frames to and from bytes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message data could not be converted into its wire form.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Wire data could not be turned back into message data.
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("MessagePack encoding error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("MessagePack decoding error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),
}

impl ProtocolError {
    /// Whether this error came from the encoding direction.
    #[must_use]
    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            ProtocolError::Encoding(_) | ProtocolError::MsgPackEncode(_) | ProtocolError::FrameTooLarge(_)
        )
    }
}
