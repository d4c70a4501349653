use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;

use crate::model::*;

use super::{LeaseStore, StoreError};

/// Process-local store. Each guarded update runs while holding the row's
/// shard lock, so the predicate check and the write are atomic per row.
pub struct InMemoryStore {
    reservations: DashMap<ReservationId, Reservation>,
    watchers: DashMap<ReservationId, Vec<String>>,
    audit: Mutex<Vec<AuditEntry>>,
    /// Rows whose writes fail, for exercising partial-failure paths.
    poisoned: DashSet<ReservationId>,
    audit_poisoned: DashSet<ReservationId>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            watchers: DashMap::new(),
            audit: Mutex::new(Vec::new()),
            poisoned: DashSet::new(),
            audit_poisoned: DashSet::new(),
        }
    }

    // ── Seeding & inspection ─────────────────────────────────

    pub fn insert(&self, reservation: Reservation) {
        self.reservations.insert(reservation.id, reservation);
    }

    pub fn snapshot(&self, id: ReservationId) -> Option<Reservation> {
        self.reservations.get(&id).map(|r| r.value().clone())
    }

    pub fn all(&self) -> Vec<Reservation> {
        let mut rows: Vec<Reservation> = self.reservations.iter().map(|r| r.value().clone()).collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    pub fn add_watcher(&self, id: ReservationId, email: impl Into<String>) {
        self.watchers.entry(id).or_default().push(email.into());
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().await.clone()
    }

    pub async fn audit_for(&self, id: ReservationId) -> Vec<AuditEntry> {
        self.audit
            .lock()
            .await
            .iter()
            .filter(|e| e.reservation_id == id)
            .cloned()
            .collect()
    }

    /// Make every state write touching `id` fail.
    pub fn poison(&self, id: ReservationId) {
        self.poisoned.insert(id);
    }

    /// Make audit appends for `id` fail.
    pub fn poison_audit(&self, id: ReservationId) {
        self.audit_poisoned.insert(id);
    }

    fn check_poison(&self, id: ReservationId) -> Result<(), StoreError> {
        if self.poisoned.contains(&id) {
            return Err(StoreError::Database(format!("write to reservation {id} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for InMemoryStore {
    async fn get(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn find_lease_holder(
        &self,
        kind: ResourceKind,
        resource_id: ResourceId,
        statuses: &[ReservationStatus],
        exclude: Option<ReservationId>,
        now: Timestamp,
    ) -> Result<Option<ReservationId>, StoreError> {
        Ok(self
            .reservations
            .iter()
            .filter(|r| Some(r.id) != exclude)
            .filter(|r| r.resource_id(kind) == Some(resource_id))
            .filter(|r| statuses.contains(&r.status))
            .filter(|r| r.has_active_lease(kind, now))
            .map(|r| r.id)
            .min())
    }

    async fn assign_lease(
        &self,
        id: ReservationId,
        kind: ResourceKind,
        resource_id: ResourceId,
        until: Timestamp,
    ) -> Result<u64, StoreError> {
        self.check_poison(id)?;
        let Some(mut row) = self.reservations.get_mut(&id) else {
            return Ok(0);
        };
        if row.status.is_terminal() {
            return Ok(0);
        }
        match kind {
            ResourceKind::Vehicle => {
                row.vehicle_id = Some(resource_id);
                row.vehicle_lease_until = Some(until);
            }
            ResourceKind::Driver => {
                row.driver_id = Some(resource_id);
                row.driver_lease_until = Some(until);
            }
        }
        Ok(1)
    }

    async fn expired_pending(&self, now: Timestamp) -> Result<Vec<Reservation>, StoreError> {
        let mut rows: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Pending && r.vehicle_lease_expired(now))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    async fn cancel_if_expired(
        &self,
        id: ReservationId,
        reason: &str,
        now: Timestamp,
    ) -> Result<u64, StoreError> {
        self.check_poison(id)?;
        let Some(mut row) = self.reservations.get_mut(&id) else {
            return Ok(0);
        };
        if row.status != ReservationStatus::Pending || !row.vehicle_lease_expired(now) {
            return Ok(0);
        }
        row.status = ReservationStatus::Cancelled;
        row.reject_reason = Some(reason.to_string());
        row.clear_leases();
        Ok(1)
    }

    async fn expired_approved(&self, now: Timestamp) -> Result<Vec<ReservationId>, StoreError> {
        let mut ids: Vec<ReservationId> = self
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Approved && r.any_lease_expired(now))
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn release_expired(
        &self,
        ids: &[ReservationId],
        now: Timestamp,
    ) -> Result<Vec<ReservationId>, StoreError> {
        // One statement in a relational store: any failing row fails the batch.
        for id in ids {
            self.check_poison(*id)?;
        }
        let mut released = Vec::new();
        for id in ids {
            if let Some(mut row) = self.reservations.get_mut(id)
                && row.status == ReservationStatus::Approved
                && row.any_lease_expired(now)
            {
                row.clear_leases();
                released.push(*id);
            }
        }
        Ok(released)
    }

    async fn clear_terminal_leases(&self) -> Result<u64, StoreError> {
        let mut cleared = 0;
        for mut row in self.reservations.iter_mut() {
            if row.status.is_terminal() && row.has_any_lease() {
                if self.poisoned.contains(&row.id) {
                    return Err(StoreError::Database(format!(
                        "write to reservation {} failed",
                        row.id
                    )));
                }
                row.clear_leases();
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if self.audit_poisoned.contains(&entry.reservation_id) {
            return Err(StoreError::Database(format!(
                "audit write for reservation {} failed",
                entry.reservation_id
            )));
        }
        self.audit.lock().await.push(entry.clone());
        Ok(())
    }

    async fn watchers(&self, id: ReservationId) -> Result<Vec<String>, StoreError> {
        Ok(self.watchers.get(&id).map(|w| w.value().clone()).unwrap_or_default())
    }
}
