//! Persistence port for reservations, audit history, and watcher subscriptions.
//!
//! Every mutation the lease manager performs is a guarded update: the store
//! re-checks the predicate at write time and reports what it actually touched,
//! so concurrent sweeps never act twice on the same row.

mod memory;
mod postgres;
mod update;

pub use memory::InMemoryStore;
pub use postgres::{PgAdminDirectory, PgLeaseStore};
pub use update::{SqlValue, UpdateBuilder};

use async_trait::async_trait;

use crate::model::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// First reservation other than `exclude` holding `resource_id` in the
    /// `kind` namespace with `lease_until > now` and a status in `statuses`.
    async fn find_lease_holder(
        &self,
        kind: ResourceKind,
        resource_id: ResourceId,
        statuses: &[ReservationStatus],
        exclude: Option<ReservationId>,
        now: Timestamp,
    ) -> Result<Option<ReservationId>, StoreError>;

    /// Assign the resource and its lease deadline. Refuses terminal
    /// reservations; returns rows affected.
    async fn assign_lease(
        &self,
        id: ReservationId,
        kind: ResourceKind,
        resource_id: ResourceId,
        until: Timestamp,
    ) -> Result<u64, StoreError>;

    /// Pending reservations whose vehicle lease expired before `now`.
    async fn expired_pending(&self, now: Timestamp) -> Result<Vec<Reservation>, StoreError>;

    /// `UPDATE .. SET status = Cancelled, reject_reason = reason, leases = NULL
    /// WHERE id = id AND status = Pending AND vehicle_lease_until < now`.
    async fn cancel_if_expired(
        &self,
        id: ReservationId,
        reason: &str,
        now: Timestamp,
    ) -> Result<u64, StoreError>;

    /// Ids of Approved reservations with either lease expired before `now`.
    async fn expired_approved(&self, now: Timestamp) -> Result<Vec<ReservationId>, StoreError>;

    /// Clear both leases on every id still Approved with an expired lease.
    /// Returns the ids actually updated.
    async fn release_expired(
        &self,
        ids: &[ReservationId],
        now: Timestamp,
    ) -> Result<Vec<ReservationId>, StoreError>;

    /// Clear lease fields on Rejected/Cancelled rows. Returns rows affected.
    async fn clear_terminal_leases(&self) -> Result<u64, StoreError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Addresses previously subscribed to notifications for this reservation.
    async fn watchers(&self, id: ReservationId) -> Result<Vec<String>, StoreError>;
}
