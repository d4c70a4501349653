//! Environment-driven configuration.
//!
//! `.env` is honoured through `dotenvy`. Malformed numbers fall back to their
//! defaults with a warning; relay validation is deferred to
//! [`RelaySettings::resolve`] so a bad relay never blocks startup.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::model::{ResourceKind, Timestamp};
use crate::notify::RelaySettings;
use crate::time::add_hours;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_LEASE_HOURS: i64 = 2;
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;

/// How long a fresh claim holds each kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    pub vehicle_hours: i64,
    pub driver_hours: i64,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            vehicle_hours: DEFAULT_LEASE_HOURS,
            driver_hours: DEFAULT_LEASE_HOURS,
        }
    }
}

impl LeasePolicy {
    pub fn hours(&self, kind: ResourceKind) -> i64 {
        match kind {
            ResourceKind::Vehicle => self.vehicle_hours,
            ResourceKind::Driver => self.driver_hours,
        }
    }

    pub fn lease_until(&self, kind: ResourceKind, from: Timestamp) -> Timestamp {
        add_hours(from, self.hours(kind))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    pub admin_email: Option<String>,
    pub template_id: Option<String>,
    pub template_api_key: Option<String>,
    pub template_api_url: String,
    pub relay: RelaySettings,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: Option<String>,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
    pub lease: LeasePolicy,
    pub notifier: NotifierConfig,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let vehicle_hours = parse_or(&get, "FLEET_LEASE_VEHICLE_HOURS", DEFAULT_LEASE_HOURS);
        let driver_hours = parse_or(&get, "FLEET_LEASE_DRIVER_HOURS", DEFAULT_LEASE_HOURS);

        Self {
            database_url: get("DATABASE_URL"),
            sweep_interval: Duration::from_secs(
                parse_or(&get, "FLEET_LEASE_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS).max(1),
            ),
            metrics_port: get("FLEET_LEASE_METRICS_PORT").and_then(|p| match p.parse() {
                Ok(port) => Some(port),
                Err(_) => {
                    warn!("ignoring malformed FLEET_LEASE_METRICS_PORT={p:?}");
                    None
                }
            }),
            lease: LeasePolicy {
                vehicle_hours,
                driver_hours,
            },
            notifier: NotifierConfig {
                admin_email: get("NOTIFY_ADMIN_EMAIL"),
                template_id: get("NOTIFY_TEMPLATE_ID"),
                template_api_key: get("NOTIFY_TEMPLATE_API_KEY"),
                template_api_url: get("NOTIFY_TEMPLATE_API_URL")
                    .unwrap_or_else(|| crate::notify::DEFAULT_TEMPLATE_API_URL.to_string()),
                relay: RelaySettings {
                    host: get("NOTIFY_SMTP_HOST"),
                    port: get("NOTIFY_SMTP_PORT"),
                    user: get("NOTIFY_SMTP_USER"),
                    pass: get("NOTIFY_SMTP_PASS"),
                },
                timeout: Duration::from_secs(
                    parse_or(&get, "NOTIFY_TIMEOUT_SECS", DEFAULT_NOTIFY_TIMEOUT_SECS).max(1),
                ),
            },
        }
    }
}

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("ignoring malformed {key}={raw:?}");
            default
        }),
    }
}
