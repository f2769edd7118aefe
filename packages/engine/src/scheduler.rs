//! Periodic expiry sweep.
//!
//! Lazy expiry already keeps expired reports out of every query result. The
//! sweep exists to release their memory and to push an updated nearby view
//! to subscribers when reports age out while nobody is querying.

use std::sync::Arc;
use std::time::Duration;

use roadwatch_report_models::SWEEP_INTERVAL_SECS;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ReportEngine;

/// Runs [`ReportEngine::sweep`] on a fixed interval.
pub struct SweepScheduler {
    engine: Arc<ReportEngine>,
    interval: Duration,
}

impl SweepScheduler {
    /// Creates a scheduler with the default interval of
    /// [`SWEEP_INTERVAL_SECS`].
    #[must_use]
    pub const fn new(engine: Arc<ReportEngine>) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
        }
    }

    /// Sets a custom sweep interval. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Spawns the sweep loop onto the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown, signal) = oneshot::channel();
        let task = tokio::spawn(self.run(signal));
        SchedulerHandle { shutdown, task }
    }

    /// Runs until `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        log::info!(
            "Sweep scheduler starting (interval {}ms)",
            self.interval.as_millis()
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    log::info!("Sweep scheduler shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let removed = self.engine.sweep();
                    if removed > 0 {
                        log::debug!("Sweep removed {removed} report(s)");
                    }
                }
            }
        }
    }
}

/// Stops a spawned [`SweepScheduler`]. Dropping the handle also stops it.
pub struct SchedulerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the scheduler to stop and waits for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            log::warn!("Sweep scheduler task failed: {e}");
        }
    }
}
