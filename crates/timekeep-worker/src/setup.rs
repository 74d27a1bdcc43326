//! Database setup and service wiring

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use timekeep_core::{Config, InvitationMailer, NoOpInvitationMailer, NotificationSink, SystemClock};
use timekeep_services::{
    BroadcastNotificationSink, InvitationService, InvitationServiceConfig, InvitationSweepService,
    Repositories, SmtpInvitationMailer,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connect the pool and apply pending migrations.
pub async fn setup_database(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Build the invitation sweep on top of the Postgres repositories.
pub fn build_sweep(config: &Config, pool: PgPool) -> Arc<InvitationSweepService> {
    let repositories = Repositories::postgres(pool);

    let mailer: Arc<dyn InvitationMailer> = match SmtpInvitationMailer::from_config(config) {
        Some(mailer) => Arc::new(mailer),
        None => Arc::new(NoOpInvitationMailer),
    };
    let notifications: Arc<dyn NotificationSink> =
        Arc::new(BroadcastNotificationSink::new(EVENT_CHANNEL_CAPACITY));

    let invitations = InvitationService::new(
        &repositories,
        mailer,
        notifications,
        Arc::new(SystemClock),
        InvitationServiceConfig::from(config),
    );

    Arc::new(InvitationSweepService::new(
        invitations,
        config.invitation_sweep_interval_secs,
    ))
}
