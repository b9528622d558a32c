//! WebSocket connection management, routing, idle sweep and session lifecycle.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod registry;
pub mod session;
