//! In-process [`HistoryStore`].
//!
//! Each key owns a [`KeyLog`] inside a `DashMap` shard. Appends take the
//! shard's write lock, so reading the last score, incrementing it and pushing
//! the entry happen as one step per key. Expiry is checked lazily on every
//! access and eagerly by [`purge_expired`](HistoryStore::purge_expired).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parley_core::{Clock, Frame, HistoryKey, SystemClock};
use tracing::debug;

use crate::errors::StoreError;
use crate::store::{HistoryEntry, HistoryStore, RangeOrder, TtlPolicy, resolve_ranks};

#[derive(Debug)]
struct KeyLog {
    entries: Vec<HistoryEntry>,
    last_score: u64,
    expires_at: DateTime<Utc>,
}

impl KeyLog {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Memory-backed history with per-class TTLs.
pub struct MemoryHistoryStore {
    logs: DashMap<HistoryKey, KeyLog>,
    ttl: TtlPolicy,
    clock: Arc<dyn Clock>,
}

impl MemoryHistoryStore {
    /// Store on the system clock.
    pub fn new(ttl: TtlPolicy) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Store on an explicit clock.
    pub fn with_clock(ttl: TtlPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            logs: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Number of keys currently held, expired or not.
    pub fn key_count(&self) -> usize {
        self.logs.len()
    }

    fn expiry_for(&self, key: &HistoryKey, now: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = self.ttl.ttl_for(key.ttl_class());
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, key: &HistoryKey, frame: Frame) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry_for(key, now);

        let mut log = self.logs.entry(*key).or_insert_with(|| KeyLog {
            entries: Vec::new(),
            last_score: 0,
            expires_at,
        });
        if log.is_expired(now) {
            log.entries.clear();
            log.last_score = 0;
        }

        let score = log
            .last_score
            .checked_add(1)
            .ok_or_else(|| StoreError::ScoreOverflow(key.to_string()))?;
        log.last_score = score;
        log.entries.push(HistoryEntry { score, frame });
        log.expires_at = expires_at;

        debug!(key = %key, score, "history append");
        Ok(score)
    }

    async fn range(
        &self,
        key: &HistoryKey,
        start: i64,
        end: i64,
        order: RangeOrder,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let now = self.clock.now();
        {
            let Some(log) = self.logs.get(key) else {
                return Ok(Vec::new());
            };
            if !log.is_expired(now) {
                let len = log.entries.len();
                let Some(ranks) = resolve_ranks(len, start, end) else {
                    return Ok(Vec::new());
                };
                let out = match order {
                    RangeOrder::Ascending => log.entries[ranks].to_vec(),
                    // rank r counted from the newest maps to index len - 1 - r
                    RangeOrder::Descending => log.entries[len - ranks.end..len - ranks.start]
                        .iter()
                        .rev()
                        .cloned()
                        .collect(),
                };
                return Ok(out);
            }
        }
        // the read guard is released before taking the shard write lock
        let _ = self.logs.remove_if(key, |_, log| log.is_expired(now));
        Ok(Vec::new())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut removed = 0usize;
        self.logs.retain(|_, log| {
            let keep = !log.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!(removed, "purged expired history keys");
        }
        Ok(removed)
    }
}
