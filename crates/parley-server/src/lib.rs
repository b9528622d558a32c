//! # parley-server
//!
//! Real-time chat relay: connection tracking, message dispatch, idle
//! eviction and LAN mirroring behind an axum HTTP + `WebSocket` front end.
//!
//! - [`websocket`]: per-connection state, the registry, the dispatcher, the
//!   heartbeat sweeper and the session loop
//! - [`mirror`]: UDP broadcast republishing between relays on one network
//! - [`auth`], [`presence`], [`membership`]: collaborator seams with default
//!   implementations
//! - [`server`]: routes (`/ws`, `/history`, `/health`, `/metrics`) and lifecycle
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod health;
pub mod history_api;
pub mod membership;
pub mod metrics;
pub mod mirror;
pub mod presence;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{Authenticator, Claims, Identity, JwtAuthenticator, issue_token};
pub use errors::{AuthError, EnqueueError, MembershipError, MirrorError, PresenceError, ServerError};
pub use mirror::{BroadcastMirror, MirrorConfig};
pub use server::{ChatServer, ServerConfig, ServerDeps};
pub use websocket::connection::{CloseReason, Connection, ConnectionState};
pub use websocket::dispatcher::{Delivery, Dispatcher, RouteOutcome};
pub use websocket::registry::{ConnectionRegistry, Registry};
