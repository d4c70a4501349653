use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::lease::LeaseManager;

/// Background task that periodically reconciles expired leases.
///
/// Lazy callers may still sweep on their own read paths; the two compose
/// because every sweep write is guarded.
///
/// `shutdown` is only observed between sweeps. A sweep that has started runs
/// to completion, so no committed transition is left without its audit entry.
pub async fn run_reaper(manager: Arc<LeaseManager>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }
        let report = manager.reconcile_expired_leases().await;
        for failure in &report.failures {
            warn!(
                pass = failure.pass.label(),
                reservation = ?failure.reservation_id,
                "reaper: {}",
                failure.error
            );
        }
        if report.cancelled + report.released + report.cleaned_up > 0 {
            info!(
                cancelled = report.cancelled,
                released = report.released,
                cleaned_up = report.cleaned_up,
                "reaper reconciled expired leases"
            );
        }
    }
    info!("reaper stopped");
}
