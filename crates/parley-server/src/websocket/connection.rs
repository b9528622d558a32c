//! Per-socket connection state.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use parley_core::{Frame, GroupId, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;
use uuid::Uuid;

use crate::auth::Identity;
use crate::errors::EnqueueError;
use crate::metrics::WS_OUTBOUND_DROPS_TOTAL;

/// Why a connection is closing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// Reading from the transport failed.
    ReadError,
    /// Writing to the transport failed.
    WriteError,
    /// The idle sweep evicted it.
    SweepEviction,
    /// A newer handshake for the same user took its registry slot.
    Replaced,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    /// Label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::WriteError => "write_error",
            Self::SweepEviction => "sweep_eviction",
            Self::Replaced => "replaced",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle: `Connecting -> Open -> Closing(reason) -> Closed(reason)`.
///
/// `Closed` is terminal; a reconnect always builds a new [`Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Authenticated, not yet registered.
    Connecting,
    /// Registered and serving frames.
    Open,
    /// Close requested; loops are winding down.
    Closing(CloseReason),
    /// Torn down and removed from the registry.
    Closed(CloseReason),
}

/// A live client connection.
///
/// Shared by reference between its own session tasks, the registry, the
/// dispatcher and the sweeper. Only the session's inbound loop updates the
/// heartbeat; everyone else talks to it through [`Connection::enqueue`] and
/// [`Connection::close`].
pub struct Connection {
    id: Uuid,
    owner: UserId,
    username: String,
    remote_addr: SocketAddr,
    first_connected_at: DateTime<Utc>,
    login_at: DateTime<Utc>,
    last_heartbeat_ms: AtomicI64,
    tx: mpsc::Sender<Frame>,
    dropped: AtomicU64,
    groups: RwLock<HashSet<GroupId>>,
    close: CancellationToken,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Build a connection with an outbound queue of `queue_capacity` frames.
    ///
    /// Returns the receiving half of the queue for the outbound loop.
    pub fn new(
        identity: Identity,
        remote_addr: SocketAddr,
        queue_capacity: usize,
        now: DateTime<Utc>,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Self {
            id: Uuid::now_v7(),
            owner: identity.user_id,
            username: identity.username,
            remote_addr,
            first_connected_at: now,
            login_at: now,
            last_heartbeat_ms: AtomicI64::new(now.timestamp_millis()),
            tx,
            dropped: AtomicU64::new(0),
            groups: RwLock::new(HashSet::new()),
            close: CancellationToken::new(),
            state: Mutex::new(ConnectionState::Connecting),
        };
        (conn, rx)
    }

    /// Unique id of this connection instance.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The user this connection belongs to.
    pub fn owner(&self) -> UserId {
        self.owner
    }

    /// Display name from the handshake token.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// When the socket was accepted.
    pub fn first_connected_at(&self) -> DateTime<Utc> {
        self.first_connected_at
    }

    /// When the handshake completed.
    pub fn login_at(&self) -> DateTime<Utc> {
        self.login_at
    }

    /// Record a heartbeat at `now`. Never moves the timestamp backwards.
    pub fn heartbeat(&self, now: DateTime<Utc>) {
        let _ = self
            .last_heartbeat_ms
            .fetch_max(now.timestamp_millis(), Ordering::AcqRel);
    }

    /// Time of the last heartbeat (or of the handshake, if none yet).
    pub fn last_heartbeat_at(&self) -> DateTime<Utc> {
        let ms = self.last_heartbeat_ms.load(Ordering::Acquire);
        DateTime::from_timestamp_millis(ms).unwrap_or_default()
    }

    /// How long the connection has been silent as of `now`.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let last = self.last_heartbeat_ms.load(Ordering::Acquire);
        let idle = now.timestamp_millis().saturating_sub(last).max(0);
        Duration::from_millis(idle as u64)
    }

    /// Queue a frame for delivery without waiting.
    ///
    /// On a full queue the new frame is dropped; earlier frames are kept.
    pub fn enqueue(&self, frame: Frame) -> Result<(), EnqueueError> {
        if self.close.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(WS_OUTBOUND_DROPS_TOTAL).increment(1);
                warn!(user_id = %self.owner, dropped, "outbound queue full, dropping frame");
                Err(EnqueueError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(EnqueueError::Closed),
        }
    }

    /// Frames dropped on this connection so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remember that this user received traffic for `group`.
    pub fn remember_group(&self, group: GroupId) {
        if !self.groups.read().contains(&group) {
            let _ = self.groups.write().insert(group);
        }
    }

    /// Groups this connection has seen traffic for.
    pub fn groups(&self) -> Vec<GroupId> {
        self.groups.read().iter().copied().collect()
    }

    /// `Connecting -> Open`. Returns `false` if the connection is already closing.
    pub fn mark_open(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
            true
        } else {
            false
        }
    }

    /// Ask the connection to close. The first reason wins.
    ///
    /// Returns `true` if this call initiated the close.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.state.lock();
            match *state {
                ConnectionState::Connecting | ConnectionState::Open => {
                    *state = ConnectionState::Closing(reason);
                }
                ConnectionState::Closing(_) | ConnectionState::Closed(_) => return false,
            }
        }
        self.close.cancel();
        true
    }

    /// Final transition once teardown is complete. Returns the close reason.
    pub fn mark_closed(&self) -> CloseReason {
        let mut state = self.state.lock();
        let reason = match *state {
            ConnectionState::Closing(reason) | ConnectionState::Closed(reason) => reason,
            ConnectionState::Connecting | ConnectionState::Open => CloseReason::PeerClosed,
        };
        *state = ConnectionState::Closed(reason);
        drop(state);
        self.close.cancel();
        reason
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Reason passed to the first [`close`](Self::close), if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.state() {
            ConnectionState::Closing(reason) | ConnectionState::Closed(reason) => Some(reason),
            ConnectionState::Connecting | ConnectionState::Open => None,
        }
    }

    /// Whether a close has been requested.
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once the connection starts closing.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
