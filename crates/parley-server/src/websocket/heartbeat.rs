//! Idle-connection sweep.
//!
//! Clients send a heartbeat envelope periodically; the session records it on
//! the connection. A single background task walks the registry on a fixed
//! period and closes every connection that has been silent for longer than
//! the idle limit.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parley_core::{Clock, UserId};
use parley_settings::HeartbeatSettings;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::connection::{CloseReason, Connection};
use super::registry::Registry;
use crate::metrics::{SWEEP_EVICTIONS_TOTAL, SWEEP_FAILURES_TOTAL};

/// Sweep timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepConfig {
    /// Delay before the first sweep.
    pub initial_delay: Duration,
    /// Time between sweeps.
    pub period: Duration,
    /// Silence after which a connection is evicted.
    pub max_idle: Duration,
}

impl SweepConfig {
    /// Timing from settings.
    pub fn from_settings(settings: &HeartbeatSettings) -> Self {
        Self {
            initial_delay: settings.initial_delay(),
            period: settings.sweep_period(),
            max_idle: settings.max_idle(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self::from_settings(&HeartbeatSettings::default())
    }
}

/// What one sweep did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections looked at.
    pub examined: usize,
    /// Owners of the connections that were closed.
    pub evicted: Vec<UserId>,
    /// Evictions that panicked.
    pub failures: usize,
}

fn close_idle(conn: &Connection) -> bool {
    conn.close(CloseReason::SweepEviction)
}

/// Periodic idle sweeper over a [`Registry`].
pub struct HeartbeatSweeper {
    registry: Arc<dyn Registry>,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
    evict: fn(&Connection) -> bool,
}

impl HeartbeatSweeper {
    /// Sweeper over `registry`, reading time from `clock`.
    pub fn new(registry: Arc<dyn Registry>, clock: Arc<dyn Clock>, config: SweepConfig) -> Self {
        Self {
            registry,
            clock,
            config,
            evict: close_idle,
        }
    }

    #[cfg(test)]
    fn with_evict_fn(mut self, evict: fn(&Connection) -> bool) -> Self {
        self.evict = evict;
        self
    }

    /// Run one sweep now.
    ///
    /// A connection is evicted when its idle time is strictly greater than
    /// `max_idle`. A failure on one connection does not stop the sweep.
    pub fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        for conn in self.registry.snapshot() {
            report.examined += 1;
            let idle = conn.idle_for(now);
            if idle <= self.config.max_idle {
                continue;
            }
            let evict = self.evict;
            match catch_unwind(AssertUnwindSafe(|| evict(&conn))) {
                Ok(true) => {
                    counter!(SWEEP_EVICTIONS_TOTAL).increment(1);
                    info!(
                        user_id = %conn.owner(),
                        idle_secs = idle.as_secs(),
                        "evicting idle connection"
                    );
                    report.evicted.push(conn.owner());
                }
                Ok(false) => {
                    debug!(user_id = %conn.owner(), "idle connection already closing");
                }
                Err(_) => {
                    counter!(SWEEP_FAILURES_TOTAL).increment(1);
                    error!(user_id = %conn.owner(), "eviction panicked");
                    report.failures += 1;
                }
            }
        }
        report
    }

    /// Sweep until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        tokio::select! {
            () = time::sleep(self.config.initial_delay) => {}
            () = cancel.cancelled() => return,
        }

        let mut ticker = time::interval(self.config.period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep_once();
                    debug!(
                        examined = report.examined,
                        evicted = report.evicted.len(),
                        failures = report.failures,
                        "heartbeat sweep"
                    );
                }
                () = cancel.cancelled() => {
                    debug!("heartbeat sweeper stopped");
                    return;
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
