//! Raw wire frames.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;

/// A raw text frame as received from (or sent to) a client.
///
/// Frames are forwarded, stored and mirrored verbatim; the relay never
/// re-encodes what a client sent. Cloning is cheap, so one inbound frame can
/// be fanned out to many outbound queues without copying the payload.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame(Arc<str>);

impl Frame {
    /// Build a frame from binary payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        std::str::from_utf8(bytes)
            .map(Self::from)
            .map_err(|_| DecodeError::NotUtf8)
    }

    /// Frame payload.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl AsRef<str> for Frame {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&&*self.0).finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
