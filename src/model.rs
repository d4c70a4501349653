use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Reservation primary key as stored.
pub type ReservationId = i64;

/// Vehicle or driver roster id.
pub type ResourceId = i64;

/// Local wall-clock timestamp. The whole system runs in one implicit time zone.
pub type Timestamp = NaiveDateTime;

/// Shown verbatim to requesters whose reservation was auto-cancelled.
pub const AUTO_CANCEL_REASON: &str =
    "Automatically cancelled: the vehicle hold expired before the request was approved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Rejected | ReservationStatus::Cancelled)
    }

    /// Column value used by the relational store.
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "Pending",
            ReservationStatus::Approved => "Approved",
            ReservationStatus::Rejected => "Rejected",
            ReservationStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ReservationStatus::Pending),
            "Approved" => Some(ReservationStatus::Approved),
            "Rejected" => Some(ReservationStatus::Rejected),
            "Cancelled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two independent lease namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Vehicle,
    Driver,
}

impl ResourceKind {
    /// Statuses that hold a claim on the resource while the lease is active.
    /// Vehicles are claimed as soon as a request is pending; drivers only once approved.
    pub fn contention_set(self) -> &'static [ReservationStatus] {
        match self {
            ResourceKind::Vehicle => &[ReservationStatus::Pending, ReservationStatus::Approved],
            ResourceKind::Driver => &[ReservationStatus::Approved],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Vehicle => "vehicle",
            ResourceKind::Driver => "driver",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A booking row. Requester fields are owned by the booking handlers and only read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub reference_code: String,
    /// Booking type label, e.g. "vehicle" or "overtime transport".
    pub kind: String,
    pub status: ReservationStatus,
    pub vehicle_id: Option<ResourceId>,
    pub driver_id: Option<ResourceId>,
    pub vehicle_lease_until: Option<Timestamp>,
    pub driver_lease_until: Option<Timestamp>,
    pub reject_reason: Option<String>,
    pub contact_email: Option<String>,
    pub requester_name: Option<String>,
    pub requester_employee_id: Option<String>,
}

impl Reservation {
    pub fn new(id: ReservationId, reference_code: impl Into<String>, status: ReservationStatus) -> Self {
        Self {
            id,
            reference_code: reference_code.into(),
            kind: "vehicle".to_string(),
            status,
            vehicle_id: None,
            driver_id: None,
            vehicle_lease_until: None,
            driver_lease_until: None,
            reject_reason: None,
            contact_email: None,
            requester_name: None,
            requester_employee_id: None,
        }
    }

    pub fn resource_id(&self, kind: ResourceKind) -> Option<ResourceId> {
        match kind {
            ResourceKind::Vehicle => self.vehicle_id,
            ResourceKind::Driver => self.driver_id,
        }
    }

    pub fn lease_until(&self, kind: ResourceKind) -> Option<Timestamp> {
        match kind {
            ResourceKind::Vehicle => self.vehicle_lease_until,
            ResourceKind::Driver => self.driver_lease_until,
        }
    }

    /// A lease is active iff its deadline is set and strictly in the future.
    pub fn has_active_lease(&self, kind: ResourceKind, now: Timestamp) -> bool {
        self.lease_until(kind).is_some_and(|until| until > now)
    }

    pub fn has_any_lease(&self) -> bool {
        self.vehicle_lease_until.is_some() || self.driver_lease_until.is_some()
    }

    pub fn vehicle_lease_expired(&self, now: Timestamp) -> bool {
        self.vehicle_lease_until.is_some_and(|until| until < now)
    }

    pub fn any_lease_expired(&self, now: Timestamp) -> bool {
        self.vehicle_lease_expired(now) || self.driver_lease_until.is_some_and(|until| until < now)
    }

    pub fn clear_leases(&mut self) {
        self.vehicle_lease_until = None;
        self.driver_lease_until = None;
    }
}

/// Append-only history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub reservation_id: ReservationId,
    pub actor: String,
    pub action: String,
    pub details: serde_json::Value,
    pub timestamp: Timestamp,
}

// ── Sweep results ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepPass {
    AutoCancel,
    AutoRelease,
    Cleanup,
}

impl SweepPass {
    pub fn label(self) -> &'static str {
        match self {
            SweepPass::AutoCancel => "auto_cancel",
            SweepPass::AutoRelease => "auto_release",
            SweepPass::Cleanup => "cleanup",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    pub pass: SweepPass,
    /// `None` when the pass failed before reaching individual records.
    pub reservation_id: Option<ReservationId>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cancelled: usize,
    pub released: usize,
    pub cleaned_up: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        self.cancelled == 0 && self.released == 0 && self.cleaned_up == 0 && self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, pass: SweepPass, reservation_id: Option<ReservationId>, error: impl ToString) {
        self.failures.push(SweepFailure {
            pass,
            reservation_id,
            error: error.to_string(),
        });
    }

    pub(crate) fn merge(&mut self, other: SweepReport) {
        self.cancelled += other.cancelled;
        self.released += other.released;
        self.cleaned_up += other.cleaned_up;
        self.failures.extend(other.failures);
    }
}
