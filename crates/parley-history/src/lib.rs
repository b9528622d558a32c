//! # parley-history
//!
//! Recent-message cache for Parley conversations.
//!
//! Every direct, group or assistant conversation has one append-only log
//! ordered by an integer score that increases by one per append. Keys expire a
//! fixed time after their *last* append. History is a convenience for clients
//! catching up; it never gates live delivery.

#![deny(unsafe_code)]

pub mod errors;
pub mod janitor;
pub mod memory;
pub mod store;

pub use errors::StoreError;
pub use janitor::spawn_janitor;
pub use memory::MemoryHistoryStore;
pub use store::{HistoryEntry, HistoryStore, RangeOrder, TtlPolicy, fetch, resolve_ranks};
