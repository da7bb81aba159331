use super::sweeper::ReconciliationSweeper;
use crate::core::{LinkError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::info;

/// Background timer driving periodic sweeps.
pub struct SweepWorker {
    sweeper: Arc<ReconciliationSweeper>,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SweepWorker {
    pub fn is_running(&self) -> bool {
        self.join_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the timer to stop and waits for it to finish. A run already
    /// past planning completes its deletes; one that is not gets cancelled.
    pub async fn stop(mut self) -> Result<()> {
        self.sweeper.cancel();
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| LinkError::ExecutionError(format!("sweep worker join: {}", err)))?;
        }
        info!("sweep worker stopped");
        Ok(())
    }
}

impl Drop for SweepWorker {
    fn drop(&mut self) {
        // Only set when stop() never ran.
        if let Some(join_handle) = self.join_handle.take() {
            self.sweeper.cancel();
            join_handle.abort();
        }
    }
}

/// Spawns the sweep timer. Each tick starts a run on its own task, so a tick
/// that lands while a run is still going is skipped rather than queued.
pub fn spawn_sweep_worker(
    sweeper: Arc<ReconciliationSweeper>,
    every: Duration,
    run_immediately: bool,
) -> SweepWorker {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let sweeper_for_worker = sweeper.clone();
    sweeper.resume();

    let join_handle = tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        if !run_immediately {
            // The first tick fires right away.
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = ticker.tick() => {
                    let sweeper = sweeper_for_worker.clone();
                    tokio::spawn(async move { sweeper.run_logged().await });
                }
            }
        }
    });

    info!(
        interval_ms = every.as_millis() as u64,
        run_immediately, "sweep worker started"
    );

    SweepWorker {
        sweeper,
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
