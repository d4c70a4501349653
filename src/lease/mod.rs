mod conflict;
mod error;
mod sweep;

pub use error::LeaseError;

use std::sync::Arc;

use crate::audit::AuditTrail;
use crate::config::LeasePolicy;
use crate::notify::Dispatcher;
use crate::store::LeaseStore;

/// Grants, checks, and reconciles vehicle and driver leases.
///
/// Holds no in-process locks: every mutation is a guarded update in the
/// store, so any number of managers may share one database.
pub struct LeaseManager {
    pub(super) store: Arc<dyn LeaseStore>,
    pub(super) audit: AuditTrail,
    pub(super) dispatcher: Arc<Dispatcher>,
    pub(super) policy: LeasePolicy,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LeaseStore>, dispatcher: Dispatcher, policy: LeasePolicy) -> Self {
        Self {
            audit: AuditTrail::new(store.clone()),
            store,
            dispatcher: Arc::new(dispatcher),
            policy,
        }
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }
}
