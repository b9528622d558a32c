//! Periodic purge of expired history keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::HistoryStore;

/// Spawn a task calling [`HistoryStore::purge_expired`] every `period` until
/// `cancel` fires.
pub fn spawn_janitor(
    store: Arc<dyn HistoryStore>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        let _ = interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "history janitor pass"),
                        Err(e) => warn!(error = %e, "history purge failed"),
                    }
                }
                () = cancel.cancelled() => {
                    debug!("history janitor stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parley_core::{Frame, HistoryKey};

    use super::*;
    use crate::errors::StoreError;
    use crate::store::{HistoryEntry, RangeOrder};

    #[derive(Default)]
    struct CountingStore {
        purges: AtomicUsize,
    }

    #[async_trait]
    impl HistoryStore for CountingStore {
        async fn append(&self, _key: &HistoryKey, _frame: Frame) -> Result<u64, StoreError> {
            Ok(1)
        }

        async fn range(
            &self,
            _key: &HistoryKey,
            _start: i64,
            _end: i64,
            _order: RangeOrder,
        ) -> Result<Vec<HistoryEntry>, StoreError> {
            Ok(Vec::new())
        }

        async fn purge_expired(&self) -> Result<usize, StoreError> {
            let _ = self.purges.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn purges_each_period_and_survives_errors() {
        let store = Arc::new(CountingStore::default());
        let cancel = CancellationToken::new();
        let handle = spawn_janitor(store.clone(), Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(151)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_cancel() {
        let store = Arc::new(CountingStore::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let handle = spawn_janitor(store.clone(), Duration::from_secs(1), cancel);
        handle.await.unwrap();
        assert_eq!(store.purges.load(Ordering::SeqCst), 0);
    }
}
