//! Timekeep background worker
//!
//! Runs the periodic invitation expiry sweep until SIGINT/SIGTERM.

mod setup;

use anyhow::Result;
use timekeep_core::Config;
use timekeep_infra::{init_telemetry, shutdown_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_telemetry("timekeep-worker", &config.environment, config.json_logs())?;

    tracing::info!(
        environment = %config.environment,
        sweep_interval_secs = config.invitation_sweep_interval_secs,
        email_enabled = config.email_enabled,
        "Starting timekeep worker"
    );

    let pool = setup::setup_database(&config).await?;
    let sweep = setup::build_sweep(&config, pool.clone());

    let handle = match sweep.clone().start() {
        Some(handle) => handle,
        None => {
            // Sweeping disabled: run a single pass so stale statuses still get written back.
            let expired = sweep.run_once().await?;
            tracing::info!(expired, "Single invitation sweep completed");
            pool.close().await;
            shutdown_telemetry().await;
            return Ok(());
        }
    };

    shutdown_signal().await;

    handle.abort();
    pool.close().await;
    shutdown_telemetry().await;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that fails to install is logged and ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
