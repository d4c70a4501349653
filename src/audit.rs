//! Append-only reservation history.
//!
//! Entries are never updated or deleted. The sweeper writes one per state
//! transition; booking handlers outside this crate write through the same
//! [`AuditTrail`].

use std::sync::Arc;

use serde_json::Value;

use crate::model::{AuditEntry, ReservationId};
use crate::store::{LeaseStore, StoreError};
use crate::time;

/// Actor recorded for transitions this crate performs on its own.
pub const SYSTEM_ACTOR: &str = "System";

pub const ACTION_AUTO_CANCEL: &str = "auto-cancel";
pub const ACTION_AUTO_RELEASE: &str = "auto-release";

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn LeaseStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }

    /// Append one entry stamped with the current local time.
    pub async fn record(
        &self,
        reservation_id: ReservationId,
        actor: &str,
        action: &str,
        details: Value,
    ) -> Result<AuditEntry, StoreError> {
        let entry = AuditEntry {
            reservation_id,
            actor: actor.to_string(),
            action: action.to_string(),
            details,
            timestamp: time::now(),
        };
        self.store.append_audit(&entry).await?;
        Ok(entry)
    }
}
