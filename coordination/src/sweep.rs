//! Background deadline sweeper
//!
//! Runs [`Coordinator::sweep`] on a fixed interval until told to stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;

/// Periodic driver for [`Coordinator::sweep`]
pub struct Sweeper {
    coordinator: Arc<Coordinator>,
    interval: Duration,
}

/// Handle to a running sweeper
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it; returns how many sweeps ran
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(sweeps) => sweeps,
            Err(e) => {
                warn!(error = %e, "Sweeper task ended abnormally");
                0
            }
        }
    }
}

impl Sweeper {
    pub fn new(coordinator: Arc<Coordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Sweep every interval until `shutdown` flips to `true` or its sender is
    /// dropped. The first sweep happens immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sweeps = 0u64;

        info!(interval_secs = self.interval.as_secs_f64(), "Sweeper started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    sweeps += 1;
                    let now = self.coordinator.now();
                    match self.coordinator.sweep(now) {
                        Ok(report) => debug!(sweep = sweeps, empty = report.is_empty(), "Sweep complete"),
                        Err(e) => warn!(sweep = sweeps, error = %e, "Sweep failed"),
                    }
                }
            }
        }
        info!(sweeps, "Sweeper stopped");
        sweeps
    }

    /// Run on the current Tokio runtime
    pub fn spawn(self) -> SweeperHandle {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        SweeperHandle { shutdown: tx, task }
    }
}
