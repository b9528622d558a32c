//! User id to live connection map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use parley_core::UserId;

use super::connection::Connection;

/// Concurrency-safe map from user id to that user's current connection.
///
/// At most one entry per user; the newest registration wins.
pub trait Registry: Send + Sync {
    /// Insert or replace the entry for `user`. Returns the displaced connection.
    fn register(&self, user: UserId, conn: Arc<Connection>) -> Option<Arc<Connection>>;

    /// Current connection for `user`.
    fn lookup(&self, user: UserId) -> Option<Arc<Connection>>;

    /// Remove `conn`'s entry only if it is still the registered one.
    ///
    /// A stale teardown therefore never evicts a newer registration.
    fn remove_if_current(&self, conn: &Arc<Connection>) -> bool;

    /// All current connections.
    fn snapshot(&self) -> Vec<Arc<Connection>>;

    /// Number of registered users.
    fn len(&self) -> usize;

    /// Whether nobody is registered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`Registry`] behind a single reader/writer lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<UserId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for ConnectionRegistry {
    fn register(&self, user: UserId, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        self.entries.write().insert(user, conn)
    }

    fn lookup(&self, user: UserId) -> Option<Arc<Connection>> {
        self.entries.read().get(&user).cloned()
    }

    fn remove_if_current(&self, conn: &Arc<Connection>) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&conn.owner()) {
            Some(current) if Arc::ptr_eq(current, conn) => {
                let _ = entries.remove(&conn.owner());
                true
            }
            _ => false,
        }
    }

    fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.entries.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
