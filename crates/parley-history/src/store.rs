//! The [`HistoryStore`] seam and rank arithmetic shared by backends.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use parley_core::{Frame, HistoryKey, TtlClass};

use crate::errors::StoreError;

/// One stored frame and its position in its key's log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Strictly increasing per key, starting at 1.
    pub score: u64,
    /// The frame exactly as the client sent it.
    pub frame: Frame,
}

/// Direction a range is read in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RangeOrder {
    /// Oldest first; rank 0 is the first append.
    #[default]
    Ascending,
    /// Newest first; rank 0 is the latest append.
    Descending,
}

/// Retention per key class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    /// Direct conversations.
    pub direct: Duration,
    /// Group conversations.
    pub group: Duration,
    /// Assistant conversations.
    pub assistant: Duration,
}

impl TtlPolicy {
    /// TTL applied to keys of `class`.
    pub fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Direct => self.direct,
            TtlClass::Group => self.group,
            TtlClass::Assistant => self.assistant,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            direct: Duration::from_secs(4 * 3600),
            group: Duration::from_secs(4 * 3600),
            assistant: Duration::from_secs(3 * 3600),
        }
    }
}

/// Append-only, TTL-bounded, per-key ordered log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append `frame` under `key`, refresh the key's TTL and return its score.
    ///
    /// Concurrent appends to one key never observe the same score.
    async fn append(&self, key: &HistoryKey, frame: Frame) -> Result<u64, StoreError>;

    /// Entries at ranks `start..=end` in `order`. Negative ranks count back
    /// from the end (`-1` is the last). A missing key yields an empty vec.
    async fn range(
        &self,
        key: &HistoryKey,
        start: i64,
        end: i64,
        order: RangeOrder,
    ) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Drop every expired key; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// Resolve inclusive, possibly negative ranks against a log of `len` entries.
///
/// Follows sorted-set range semantics: negatives are offset from `len`, a
/// start below zero clamps to zero, an end past the tail clamps to the tail,
/// and an inverted or out-of-bounds window is empty.
pub fn resolve_ranks(len: usize, start: i64, end: i64) -> Option<Range<usize>> {
    if len == 0 {
        return None;
    }
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let mut start = if start < 0 { start + len_i } else { start };
    let mut end = if end < 0 { end + len_i } else { end };
    if start < 0 {
        start = 0;
    }
    if end >= len_i {
        end = len_i - 1;
    }
    if start > end || start >= len_i {
        return None;
    }
    Some(start as usize..(end as usize + 1))
}

/// Read surface for the presentation layer.
///
/// `reverse = true` returns newest first; ranks are then counted from the
/// newest entry.
pub async fn fetch(
    store: &dyn HistoryStore,
    key: &HistoryKey,
    start: i64,
    end: i64,
    reverse: bool,
) -> Result<Vec<Frame>, StoreError> {
    let order = if reverse {
        RangeOrder::Descending
    } else {
        RangeOrder::Ascending
    };
    let entries = store.range(key, start, end, order).await?;
    Ok(entries.into_iter().map(|e| e.frame).collect())
}
