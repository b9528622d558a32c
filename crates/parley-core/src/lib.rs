//! # parley-core
//!
//! Shared vocabulary for the Parley chat relay:
//!
//! - [`ids`]: numeric `UserId` / `GroupId` newtypes
//! - [`envelope`]: the decoded [`Envelope`] and its [`MessageKind`] / [`MediaType`]
//! - [`frame`]: the raw [`Frame`] exchanged over sockets, queues, history and the mirror
//! - [`history_key`]: [`HistoryKey`] naming and retention classes
//! - [`clock`]: the injectable [`Clock`] used for heartbeats, expiry and timestamps

#![deny(unsafe_code)]

pub mod clock;
pub mod envelope;
pub mod errors;
pub mod frame;
pub mod history_key;
pub mod ids;

pub use clock::{Clock, ManualClock, SystemClock};
pub use envelope::{Envelope, MediaType, MessageKind};
pub use errors::DecodeError;
pub use frame::Frame;
pub use history_key::{HistoryKey, TtlClass};
pub use ids::{GroupId, UserId};
