//! History retention settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TTL per history key class, plus the janitor period.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Retention of one-to-one conversation keys.
    pub direct_ttl_secs: u64,
    /// Retention of group conversation keys.
    pub group_ttl_secs: u64,
    /// Retention of assistant conversation keys.
    pub assistant_ttl_secs: u64,
    /// How often expired keys are purged.
    pub purge_interval_secs: u64,
}

impl HistorySettings {
    /// Direct-chat TTL.
    pub fn direct_ttl(&self) -> Duration {
        Duration::from_secs(self.direct_ttl_secs)
    }

    /// Group TTL.
    pub fn group_ttl(&self) -> Duration {
        Duration::from_secs(self.group_ttl_secs)
    }

    /// Assistant TTL.
    pub fn assistant_ttl(&self) -> Duration {
        Duration::from_secs(self.assistant_ttl_secs)
    }

    /// Janitor period.
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            direct_ttl_secs: 4 * 3600,
            group_ttl_secs: 4 * 3600,
            assistant_ttl_secs: 3 * 3600,
            purge_interval_secs: 60,
        }
    }
}
