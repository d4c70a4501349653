//! Lease deadline arithmetic and the store's timestamp format.
//!
//! Everything runs in the host's local zone with no offset attached. Lease
//! computation and store comparisons must both go through [`now`], and every
//! timestamp handed to the store must be rendered by [`format_for_store`].

use chrono::{Duration, Local, Timelike};

use crate::model::Timestamp;

/// Exact layout of the store's offset-less timestamp column.
pub const STORE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time, truncated to whole seconds to match what the store keeps.
pub fn now() -> Timestamp {
    let t = Local::now().naive_local();
    t.with_nanosecond(0).unwrap_or(t)
}

pub fn add_hours(t: Timestamp, n: i64) -> Timestamp {
    t + Duration::hours(n)
}

pub fn add_days(t: Timestamp, n: i64) -> Timestamp {
    t + Duration::days(n)
}

/// Render as `YYYY-MM-DD HH:MM:SS`, zero-padded, no zone suffix.
pub fn format_for_store(t: Timestamp) -> String {
    t.format(STORE_FORMAT).to_string()
}
