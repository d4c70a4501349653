use tracing::{debug, info};

use crate::model::*;
use crate::observability::CONFLICTS_TOTAL;
use crate::time;

use super::{LeaseError, LeaseManager};

impl LeaseManager {
    /// Fails if another Pending or Approved reservation holds an active lease
    /// on the vehicle.
    ///
    /// This is a check, not a lock: two callers can both pass before either
    /// assigns. Exclusion across writers needs a storage-level guarantee.
    pub async fn ensure_vehicle_available(
        &self,
        vehicle_id: ResourceId,
        excluding: Option<ReservationId>,
    ) -> Result<(), LeaseError> {
        self.ensure_available(ResourceKind::Vehicle, vehicle_id, excluding)
            .await
    }

    /// Fails if another Approved reservation holds an active lease on the
    /// driver. Pending reservations do not contend for drivers.
    pub async fn ensure_driver_available(
        &self,
        driver_id: ResourceId,
        excluding: Option<ReservationId>,
    ) -> Result<(), LeaseError> {
        self.ensure_available(ResourceKind::Driver, driver_id, excluding)
            .await
    }

    pub async fn ensure_available(
        &self,
        kind: ResourceKind,
        resource_id: ResourceId,
        excluding: Option<ReservationId>,
    ) -> Result<(), LeaseError> {
        let holder = self
            .store
            .find_lease_holder(kind, resource_id, kind.contention_set(), excluding, time::now())
            .await?;
        match holder {
            Some(conflicting_reservation_id) => {
                metrics::counter!(CONFLICTS_TOTAL, "resource" => kind.label()).increment(1);
                debug!(%kind, resource_id, conflicting_reservation_id, "lease conflict");
                Err(LeaseError::Conflict {
                    kind,
                    resource_id,
                    conflicting_reservation_id,
                })
            }
            None => Ok(()),
        }
    }

    pub async fn claim_vehicle(
        &self,
        reservation_id: ReservationId,
        vehicle_id: ResourceId,
    ) -> Result<Timestamp, LeaseError> {
        self.claim(ResourceKind::Vehicle, reservation_id, vehicle_id)
            .await
    }

    pub async fn claim_driver(
        &self,
        reservation_id: ReservationId,
        driver_id: ResourceId,
    ) -> Result<Timestamp, LeaseError> {
        self.claim(ResourceKind::Driver, reservation_id, driver_id)
            .await
    }

    /// Check, then assign `resource_id` to the reservation with a deadline
    /// from the configured policy. Returns the new deadline.
    ///
    /// Re-claiming by the current holder extends its lease.
    pub async fn claim(
        &self,
        kind: ResourceKind,
        reservation_id: ReservationId,
        resource_id: ResourceId,
    ) -> Result<Timestamp, LeaseError> {
        let reservation = self
            .store
            .get(reservation_id)
            .await?
            .ok_or(LeaseError::NotFound(reservation_id))?;
        if reservation.status.is_terminal() {
            return Err(LeaseError::Terminal {
                id: reservation_id,
                status: reservation.status,
            });
        }

        self.ensure_available(kind, resource_id, Some(reservation_id))
            .await?;

        let until = self.policy.lease_until(kind, time::now());
        let affected = self
            .store
            .assign_lease(reservation_id, kind, resource_id, until)
            .await?;
        if affected == 0 {
            // Went terminal (or vanished) between the read and the write.
            return Err(match self.store.get(reservation_id).await? {
                Some(r) => LeaseError::Terminal {
                    id: reservation_id,
                    status: r.status,
                },
                None => LeaseError::NotFound(reservation_id),
            });
        }
        info!(
            reservation = reservation_id,
            %kind,
            resource_id,
            until = %time::format_for_store(until),
            "lease granted"
        );
        Ok(until)
    }
}
