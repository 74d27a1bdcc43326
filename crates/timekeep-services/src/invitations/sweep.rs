use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::InvitationService;

/// Batch size used when logging which invitations a sweep is about to expire.
const SWEEP_PREVIEW_LIMIT: i64 = 100;

/// Periodically writes back the expired status of stale pending invitations.
///
/// Reads already treat such invitations as expired, so the sweep only keeps
/// stored statuses and per-status counts tidy.
#[derive(Clone)]
pub struct InvitationSweepService {
    invitations: InvitationService,
    interval_secs: u64,
}

impl InvitationSweepService {
    pub fn new(invitations: InvitationService, interval_secs: u64) -> Self {
        Self {
            invitations,
            interval_secs,
        }
    }

    /// Start the background sweep. Returns `None` when the interval is zero (sweeping disabled).
    pub fn start(self: Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        if self.interval_secs == 0 {
            tracing::info!("Invitation sweep disabled");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut sweep_interval = interval(Duration::from_secs(self.interval_secs));

            loop {
                sweep_interval.tick().await;

                tracing::info!("Starting scheduled invitation sweep");

                match self.run_once().await {
                    Ok(expired) => {
                        tracing::info!(expired, "Invitation sweep completed successfully")
                    }
                    Err(e) => tracing::error!(error = %e, "Invitation sweep failed"),
                }
            }
        }))
    }

    /// One sweep pass. Returns the number of invitations marked expired.
    #[tracing::instrument(skip(self), fields(sweep.operation = "expire_invitations"))]
    pub async fn run_once(&self) -> Result<u64, anyhow::Error> {
        let stale = self.invitations.find_expired(SWEEP_PREVIEW_LIMIT).await?;
        for invitation in &stale {
            tracing::debug!(
                invitation_id = %invitation.id,
                organization_id = %invitation.organization_id,
                expires_at = %invitation.expires_at,
                "Expiring invitation"
            );
        }

        let expired = self.invitations.expire_stale().await?;
        Ok(expired)
    }
}
