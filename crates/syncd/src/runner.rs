//! Serialises cycles and drives the schedule.

use std::sync::Arc;
use std::time::Duration;

use order_store::OrderRepository;
use sync::{CycleReport, SyncError, SyncOrchestrator};
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;

/// Runs at most one cycle at a time per process.
pub struct CycleRunner<R>
where
    R: OrderRepository,
{
    orchestrator: SyncOrchestrator<R>,
    running: Mutex<()>,
}

impl<R> CycleRunner<R>
where
    R: OrderRepository,
{
    pub fn new(orchestrator: SyncOrchestrator<R>) -> Self {
        Self {
            orchestrator,
            running: Mutex::new(()),
        }
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator<R> {
        &self.orchestrator
    }

    /// Runs one cycle, or fails with `CycleInProgress` if one is running.
    pub async fn run(&self) -> sync::Result<CycleReport> {
        let Ok(_running) = self.running.try_lock() else {
            metrics::counter!("sync_cycles_skipped_total").increment(1);
            return Err(SyncError::CycleInProgress);
        };
        self.orchestrator.run_cycle().await
    }
}

/// Runs a cycle every `every` until `shutdown` flips.
///
/// A cycle already running when shutdown is requested is finished first.
pub async fn run_schedule<R>(
    runner: Arc<CycleRunner<R>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    R: OrderRepository + 'static,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Cycle failures are logged by the orchestrator.
                if let Err(SyncError::CycleInProgress) = runner.run().await {
                    tracing::debug!("previous cycle still running; tick skipped");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!("scheduler stopping");
                break;
            }
        }
    }
}
