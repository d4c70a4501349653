use crate::model::{ReservationId, ReservationStatus, ResourceId, ResourceKind};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    /// Another reservation holds an active lease on the resource.
    #[error("{kind} {resource_id} unavailable: leased to reservation {conflicting_reservation_id}")]
    Conflict {
        kind: ResourceKind,
        resource_id: ResourceId,
        conflicting_reservation_id: ReservationId,
    },
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    #[error("reservation {id} is {status}; it can no longer hold leases")]
    Terminal {
        id: ReservationId,
        status: ReservationStatus,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LeaseError {
    /// True for the one error assignment handlers should surface as
    /// "resource unavailable" (HTTP 409).
    pub fn is_conflict(&self) -> bool {
        matches!(self, LeaseError::Conflict { .. })
    }

    pub fn conflicting_reservation_id(&self) -> Option<ReservationId> {
        match self {
            LeaseError::Conflict {
                conflicting_reservation_id,
                ..
            } => Some(*conflicting_reservation_id),
            _ => None,
        }
    }
}
