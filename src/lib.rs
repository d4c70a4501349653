//! Lease manager for fleet reservations.
//!
//! Grants bookings time-bounded exclusive use of a vehicle and/or a driver,
//! rejects conflicting claims, and lazily reconciles leases that expired
//! without anyone noticing: pending requests are auto-cancelled (with a
//! best-effort notification), approved ones give their resources back, and
//! terminal ones are scrubbed of stray leases.

pub mod audit;
pub mod config;
pub mod lease;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod store;
pub mod time;

pub use lease::{LeaseError, LeaseManager};
pub use model::AUTO_CANCEL_REASON;
