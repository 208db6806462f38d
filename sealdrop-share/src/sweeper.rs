//! Background task that periodically sweeps expired shares.

use crate::service::ShareService;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Handle to a running sweeper. Dropping it also stops the task, without
/// waiting for it.
pub struct SweeperHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the current pass to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("sweeper task ended abnormally: {e}");
        }
    }
}

/// Shortest accepted sweep interval; shorter ones are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns a task running [`ShareService::sweep_expired`] every `interval`
/// (at least [`MIN_SWEEP_INTERVAL`]). The first sweep runs immediately.
pub fn spawn_sweeper(service: ShareService, interval: Duration) -> SweeperHandle {
    let interval = interval.max(MIN_SWEEP_INTERVAL);
    let mut ticker = tokio::time::interval(interval);
    let (stop_tx, mut stop_rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        info!("expiry sweeper started (every {interval:?})");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = service.sweep_expired(Utc::now()).await {
                        warn!("expiry sweep failed: {e}");
                    }
                }
                _ = &mut stop_rx => break,
            }
        }

        info!("expiry sweeper stopped");
    });

    SweeperHandle {
        stop_tx: Some(stop_tx),
        task,
    }
}

/// Spawns a sweeper using the service's configured interval.
pub fn spawn_configured_sweeper(service: ShareService) -> SweeperHandle {
    let interval = Duration::from_secs(service.config().sweep_interval_secs);
    spawn_sweeper(service, interval)
}
