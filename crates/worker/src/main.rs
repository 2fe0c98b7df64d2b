use std::sync::Arc;

use anyhow::{Context, Result};
use calsync_core::telemetry::{init_telemetry, TelemetryConfig};
use calsync_engine::{
    InstanceContext, PostgresSyncStore, ReconcilePass, ReportCounters, Scheduler, SyncStore,
    WorkerPoolContext,
};
use calsync_worker::{router, ControlState, FleetConfig, HttpProviders};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

/// Resolves on Ctrl-C or when the control surface asks the process to exit.
async fn shutdown_signal(mut exit: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
        _ = exit.wait_for(|requested| *requested) => {
            tracing::info!("Exit requested");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Configuration errors are fatal before anything starts
    let config = FleetConfig::from_env().context("Invalid configuration")?;

    // Configure via environment variables:
    // - OTEL_EXPORTER_OTLP_ENDPOINT: OTLP endpoint (e.g., "http://localhost:4317")
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "calsync=info")
    let mut telemetry_config = TelemetryConfig::from_env().with_log_dir(&config.log_dir);
    if telemetry_config.service_name == "calsync" {
        telemetry_config.service_name = "calsync-worker".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter =
            Some("calsync_worker=info,calsync_engine=info,tower_http=info".to_string());
    }
    telemetry_config.service_version = Some(env!("CARGO_PKG_VERSION").to_string());

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard = init_telemetry(telemetry_config);

    tracing::info!(
        prefix = %config.instance_prefix,
        workers = ?config.workers,
        "calsync-worker starting..."
    );

    let loops: usize = config.workers.values().sum();
    let pool = PgPoolOptions::new()
        .max_connections((loops as u32 + 4).max(5))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    PostgresSyncStore::migrate(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Connected to database");

    let store: Arc<dyn SyncStore> = Arc::new(PostgresSyncStore::new(pool));
    let instance = Arc::new(InstanceContext::new(
        config.instance_prefix.clone(),
        env!("CARGO_PKG_VERSION"),
        config.workers.clone(),
        config.sync_timeout,
    ));
    let workers = Arc::new(WorkerPoolContext::new());
    let report = Arc::new(ReportCounters::new());

    let providers = Arc::new(HttpProviders::from_config(&config));
    let pass = Arc::new(ReconcilePass::new(
        store.clone(),
        providers,
        config.pass_settings(),
    ));
    let scheduler = Scheduler::new(
        store.clone(),
        pass,
        instance.clone(),
        workers.clone(),
        report.clone(),
        config.scheduler_config(),
    );

    let control = ControlState::new(
        instance,
        workers,
        report,
        store,
        &config.control_secret,
        &config.log_dir,
    );
    let exit = control.subscribe_exit();

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Control surface listening on {}", addr);

    // The control surface stays up while loops drain
    let (server_stop_tx, mut server_stop_rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, router(control))
            .with_graceful_shutdown(async move {
                let _ = server_stop_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    scheduler.start().context("Failed to start scheduler")?;

    shutdown_signal(exit).await;

    if let Err(e) = scheduler.shutdown(config.shutdown_max_wait).await {
        tracing::warn!(error = %e, "Drain incomplete");
    }

    server_stop_tx.send_replace(true);
    server
        .await
        .context("Control surface task failed")?
        .context("Server error")?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
