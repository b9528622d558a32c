//! Error types for the relay.

use parley_core::UserId;
use thiserror::Error;

/// The handshake was rejected. No connection is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No token in the request.
    #[error("missing token")]
    MissingToken,
    /// The token failed signature, expiry or shape checks.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The request carried no usable user id.
    #[error("missing or malformed user id")]
    MissingUserId,
    /// The token is valid but was issued to someone else.
    #[error("token issued to user {claimed}, not {requested}")]
    UserMismatch {
        /// User id inside the token.
        claimed: UserId,
        /// User id the client asked to connect as.
        requested: UserId,
    },
}

/// Group membership could not be resolved.
#[derive(Debug, Error)]
pub enum MembershipError {
    /// The membership backend failed.
    #[error("membership lookup failed: {0}")]
    Unavailable(String),
}

/// Presence could not be recorded or read.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// The presence backend failed.
    #[error("presence store unavailable: {0}")]
    Unavailable(String),
}

/// A frame could not be placed on a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity; the frame was dropped.
    #[error("outbound queue full")]
    QueueFull,
    /// The connection is closing or gone.
    #[error("connection closed")]
    Closed,
}

/// LAN mirror failures.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Socket setup or I/O failed.
    #[error("mirror socket error: {0}")]
    Io(#[from] std::io::Error),
    /// A packet could not be encoded or decoded.
    #[error("mirror packet codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// An encoded packet exceeds the datagram limit.
    #[error("mirror packet of {size} bytes exceeds limit of {limit}")]
    Oversized {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// A configured address did not parse.
    #[error("invalid mirror address {0}")]
    Address(String),
}

/// Server startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The mirror failed to start.
    #[error(transparent)]
    Mirror(#[from] MirrorError),
}
