use std::net::SocketAddr;

// ── Sweep outcomes ──────────────────────────────────────────────

/// Counter: pending reservations auto-cancelled after their vehicle hold lapsed.
pub const AUTO_CANCELLED_TOTAL: &str = "fleet_lease_auto_cancelled_total";

/// Counter: approved reservations whose expired leases were released.
pub const AUTO_RELEASED_TOTAL: &str = "fleet_lease_auto_released_total";

/// Counter: terminal reservations found still carrying leases.
pub const CLEANED_UP_TOTAL: &str = "fleet_lease_cleaned_up_total";

/// Counter: per-record or per-pass sweep failures. Labels: pass.
pub const SWEEP_FAILURES_TOTAL: &str = "fleet_lease_sweep_failures_total";

/// Histogram: full sweep duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "fleet_lease_sweep_duration_seconds";

// ── Request-driven ──────────────────────────────────────────────

/// Counter: availability checks rejected by an active lease. Labels: resource.
pub const CONFLICTS_TOTAL: &str = "fleet_lease_conflicts_total";

/// Counter: notification attempts. Labels: channel, status.
pub const NOTIFICATIONS_TOTAL: &str = "fleet_lease_notifications_total";

/// Install a default env-filtered fmt subscriber unless the host application
/// already installed one.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
