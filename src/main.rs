use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing::info;

use fleet_lease::config::Config;
use fleet_lease::notify::{AdminDirectory, Dispatcher};
use fleet_lease::store::{LeaseStore, PgAdminDirectory, PgLeaseStore};
use fleet_lease::{observability, reaper, LeaseManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` may carry RUST_LOG, so it has to be loaded before tracing starts.
    let _ = dotenvy::dotenv();
    observability::init_tracing();

    let config = Config::from_env();
    observability::init_metrics(config.metrics_port)
        .context("failed to install Prometheus metrics exporter")?;

    let database_url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to the reservation database")?;

    let store: Arc<dyn LeaseStore> = Arc::new(PgLeaseStore::new(pool.clone()));
    let directory: Arc<dyn AdminDirectory> = Arc::new(PgAdminDirectory::new(pool));
    let dispatcher = Dispatcher::from_config(&config.notifier, store.clone(), Some(directory));
    let manager = Arc::new(LeaseManager::new(store, dispatcher, config.lease));

    info!("fleet-lease reaper started");
    info!("  sweep_interval: {}s", config.sweep_interval.as_secs());
    info!(
        "  lease hours: vehicle={} driver={}",
        config.lease.vehicle_hours, config.lease.driver_hours
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let (stop, stopped) = watch::channel(false);
    let reaper = tokio::spawn(reaper::run_reaper(manager, config.sweep_interval, stopped));

    shutdown_signal().await?;
    info!("shutdown signal received, letting the current sweep finish");
    let _ = stop.send(true);
    reaper.await.context("reaper task failed")?;

    info!("fleet-lease reaper stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to register SIGTERM handler")?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    Ok(())
}
