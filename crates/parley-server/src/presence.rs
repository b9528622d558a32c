//! Online presence records.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parley_core::{Clock, UserId};

use crate::errors::PresenceError;

/// Where a user is connected from, with a TTL.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record `user` as online at `address` for `ttl`.
    async fn set_online(
        &self,
        user: UserId,
        address: &str,
        ttl: Duration,
    ) -> Result<(), PresenceError>;

    /// Address `user` was last seen at, if the record has not expired.
    async fn get_online(&self, user: UserId) -> Result<Option<String>, PresenceError>;
}

/// Storage key of a presence record.
pub fn presence_key(user: UserId) -> String {
    format!("online_{user}")
}

/// In-process presence store.
pub struct MemoryPresenceStore {
    records: DashMap<String, (String, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryPresenceStore {
    /// Empty store on `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_online(
        &self,
        user: UserId,
        address: &str,
        ttl: Duration,
    ) -> Result<(), PresenceError> {
        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let _ = self
            .records
            .insert(presence_key(user), (address.to_owned(), expires_at));
        Ok(())
    }

    async fn get_online(&self, user: UserId) -> Result<Option<String>, PresenceError> {
        let key = presence_key(user);
        let now = self.clock.now();
        let live = self
            .records
            .get(&key)
            .map(|entry| (entry.0.clone(), now < entry.1));
        match live {
            Some((address, true)) => Ok(Some(address)),
            Some((_, false)) => {
                let _ = self.records.remove_if(&key, |_, (_, exp)| now >= *exp);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
