//! Periodic incremental update.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use super::refresh::RefreshCoordinator;

const SOURCE: &str = "application::scheduler";

/// Run an incremental update every `cadence`, starting one cadence from now.
/// Abort the returned handle to stop the schedule.
pub fn spawn_incremental_schedule(
    coordinator: Arc<RefreshCoordinator>,
    cadence: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            run_incremental(&coordinator).await;
        }
    })
}

async fn run_incremental(coordinator: &RefreshCoordinator) {
    match coordinator.incremental_update().await {
        Ok(flight) => {
            let joined = !flight.is_leader();
            let report = flight.into_inner();
            info!(
                target = SOURCE,
                inserted = report.inserted,
                skipped = report.skipped,
                joined,
                "Scheduled incremental update finished"
            );
        }
        Err(err) => warn!(
            target = SOURCE,
            error = %err,
            "Scheduled incremental update failed"
        ),
    }
}
