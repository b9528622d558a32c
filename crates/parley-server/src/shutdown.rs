//! Relay shutdown: one `CancellationToken` for the listener, the background
//! loops and every session, plus a bounded drain of spawned tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::websocket::connection::CloseReason;
use crate::websocket::registry::Registry;

/// Owns the relay-wide cancellation token.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// New coordinator with an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child handle on the relay token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether [`begin`](Self::begin) has run.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then close every registered connection with
    /// [`CloseReason::Shutdown`].
    ///
    /// Cancelling first stops new handshakes from registering behind the
    /// snapshot. Returns how many closes this call initiated; connections
    /// already closing keep their original reason.
    pub fn begin(&self, registry: &dyn Registry) -> usize {
        self.token.cancel();
        let closed = registry
            .snapshot()
            .iter()
            .filter(|conn| conn.close(CloseReason::Shutdown))
            .count();
        info!(closed, "shutdown started");
        closed
    }

    /// Wait for `handles` until `deadline` elapses, aborting whatever is left.
    ///
    /// Cancels the token if [`begin`](Self::begin) has not. Returns the number
    /// of tasks aborted.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, deadline: Duration) -> usize {
        self.token.cancel();
        let until = Instant::now() + deadline;
        let mut aborted = 0;
        for mut handle in handles {
            match timeout_at(until, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => warn!(error = %e, "task panicked during shutdown"),
                Ok(Err(_)) => {}
                Err(_) => {
                    handle.abort();
                    aborted += 1;
                }
            }
        }
        if aborted > 0 {
            warn!(aborted, ?deadline, "shutdown deadline passed, tasks aborted");
        }
        aborted
    }
}
