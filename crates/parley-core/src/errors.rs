//! Frame decoding errors.

use thiserror::Error;

/// A single inbound frame could not be turned into an [`Envelope`](crate::Envelope).
///
/// Decode failures are local to the frame: the reader logs and moves on.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was not valid JSON for an envelope.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The `Type` field held a value outside `1..=3`.
    #[error("unknown message kind {0}")]
    UnknownKind(i64),
    /// The payload was binary and not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,
}
