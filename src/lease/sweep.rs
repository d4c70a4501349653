use std::time::Instant;

use serde_json::json;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::audit::{ACTION_AUTO_CANCEL, ACTION_AUTO_RELEASE, SYSTEM_ACTOR};
use crate::model::*;
use crate::observability::*;
use crate::time;

use super::LeaseManager;

impl LeaseManager {
    /// Drive every silently expired lease to its reconciled state.
    ///
    /// Safe to call from any read path and from a timer at the same time:
    /// each write is guarded by the same predicate that selected the row, so a
    /// losing concurrent sweep updates nothing and sends nothing.
    pub async fn reconcile_expired_leases(&self) -> SweepReport {
        self.reconcile_at(time::now()).await
    }

    /// [`reconcile_expired_leases`](Self::reconcile_expired_leases) against an explicit clock reading.
    pub async fn reconcile_at(&self, now: Timestamp) -> SweepReport {
        let started = Instant::now();

        // Passes act on disjoint status partitions.
        let (cancel, release, cleanup) = tokio::join!(
            self.auto_cancel_pass(now),
            self.auto_release_pass(now),
            self.cleanup_pass(),
        );
        let mut report = cancel;
        report.merge(release);
        report.merge(cleanup);

        metrics::histogram!(SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        for failure in &report.failures {
            metrics::counter!(SWEEP_FAILURES_TOTAL, "pass" => failure.pass.label()).increment(1);
        }
        if report.is_noop() {
            debug!("lease sweep: nothing to reconcile");
        } else {
            info!(
                cancelled = report.cancelled,
                released = report.released,
                cleaned_up = report.cleaned_up,
                failures = report.failures.len(),
                "lease sweep finished"
            );
        }
        report
    }

    /// Pending reservations whose vehicle hold lapsed are cancelled outright.
    ///
    /// Every candidate is committed and audited before any notice is awaited;
    /// notices then go out concurrently, each bounded by the dispatcher timeout.
    async fn auto_cancel_pass(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();
        let candidates = match self.store.expired_pending(now).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("auto-cancel: selecting expired pending reservations failed: {e}");
                report.fail(SweepPass::AutoCancel, None, e);
                return report;
            }
        };

        let mut notices = JoinSet::new();
        for reservation in candidates {
            let id = reservation.id;
            match self.store.cancel_if_expired(id, AUTO_CANCEL_REASON, now).await {
                Ok(0) => {
                    debug!(reservation = id, "auto-cancel: already reconciled elsewhere");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(reservation = id, "auto-cancel failed: {e}");
                    report.fail(SweepPass::AutoCancel, Some(id), e);
                    continue;
                }
            }
            report.cancelled += 1;
            metrics::counter!(AUTO_CANCELLED_TOTAL).increment(1);

            let expired_at = reservation.vehicle_lease_until.map(time::format_for_store);
            let details = json!({ "reason": "lease-expired", "vehicle_lease_until": expired_at });
            if let Err(e) = self.audit.record(id, SYSTEM_ACTOR, ACTION_AUTO_CANCEL, details).await {
                warn!(reservation = id, "auto-cancel committed but audit write failed: {e}");
                report.fail(SweepPass::AutoCancel, Some(id), e);
            }
            info!(reservation = id, reference = %reservation.reference_code, "auto-cancelled expired pending reservation");

            let mut cancelled = reservation;
            cancelled.status = ReservationStatus::Cancelled;
            cancelled.reject_reason = Some(AUTO_CANCEL_REASON.to_string());
            cancelled.clear_leases();
            let dispatcher = self.dispatcher.clone();
            notices.spawn(async move {
                let subject = format!("Reservation {} cancelled", cancelled.reference_code);
                dispatcher.notify(&cancelled, &subject, AUTO_CANCEL_REASON).await
            });
        }

        while let Some(joined) = notices.join_next().await {
            if let Err(e) = joined {
                warn!("auto-cancel notice task aborted: {e}");
            }
        }
        report
    }

    /// Approved reservations keep their status but give the resources back.
    async fn auto_release_pass(&self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();
        let ids = match self.store.expired_approved(now).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("auto-release: selecting expired approved reservations failed: {e}");
                report.fail(SweepPass::AutoRelease, None, e);
                return report;
            }
        };
        if ids.is_empty() {
            return report;
        }

        let released = match self.store.release_expired(&ids, now).await {
            Ok(released) => released,
            Err(e) => {
                warn!(count = ids.len(), "auto-release batch failed: {e}");
                for id in ids {
                    report.fail(SweepPass::AutoRelease, Some(id), &e);
                }
                return report;
            }
        };

        for id in released {
            report.released += 1;
            metrics::counter!(AUTO_RELEASED_TOTAL).increment(1);
            let details = json!({ "reason": "lease-expired" });
            if let Err(e) = self.audit.record(id, SYSTEM_ACTOR, ACTION_AUTO_RELEASE, details).await {
                warn!(reservation = id, "auto-release committed but audit write failed: {e}");
                report.fail(SweepPass::AutoRelease, Some(id), e);
            }
            info!(reservation = id, "released expired leases on approved reservation");
        }
        report
    }

    /// Terminal reservations must never carry leases.
    async fn cleanup_pass(&self) -> SweepReport {
        let mut report = SweepReport::default();
        match self.store.clear_terminal_leases().await {
            Ok(0) => {}
            Ok(n) => {
                report.cleaned_up = n as usize;
                metrics::counter!(CLEANED_UP_TOTAL).increment(n);
                warn!(count = n, "cleared leases left on terminal reservations");
            }
            Err(e) => {
                warn!("terminal lease cleanup failed: {e}");
                report.fail(SweepPass::Cleanup, None, e);
            }
        }
        report
    }
}
