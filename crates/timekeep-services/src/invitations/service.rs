use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use timekeep_core::models::{
    generate_token, AcceptRequest, BulkInviteEntry, BulkInviteFailure, BulkInviteResult,
    BulkInviteSent, BulkInviteSkip, Invitation, InvitationMetadata, InvitationPolicy,
    InvitationPreview, InvitationStatus, InvitationStatusCount, InviteRequest, Organization,
    PermissionOverrides, Permissions, User,
};
use timekeep_core::{
    Actor, AppError, Clock, InvitationEmail, InvitationMailer, NotificationSink, Role,
    TrackingEvent,
};
use timekeep_db::{DirectoryRepository, InvitationRepository};
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

use crate::context::Repositories;
use crate::stats::StatsService;

const MAX_BULK_INVITES: usize = 50;
const MIN_EXTEND_DAYS: i64 = 1;
const MAX_EXTEND_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct InvitationServiceConfig {
    pub policy: InvitationPolicy,
    /// Base URL of the web app; invitation links point at `{frontend_url}/accept-invitation`.
    pub frontend_url: String,
}

impl Default for InvitationServiceConfig {
    fn default() -> Self {
        Self {
            policy: InvitationPolicy::default(),
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

impl From<&timekeep_core::Config> for InvitationServiceConfig {
    fn from(config: &timekeep_core::Config) -> Self {
        Self {
            policy: config.invitation_policy(),
            frontend_url: config.frontend_url.clone(),
        }
    }
}

/// Invitation lifecycle: pending invitations are accepted, cancelled or expire.
///
/// Expiry is lazy. A pending invitation whose `expires_at` has passed is treated as
/// expired everywhere, and the expired status is written back the next time the
/// invitation is loaded for a mutation (or by [`InvitationSweepService`]).
///
/// [`InvitationSweepService`]: crate::InvitationSweepService
#[derive(Clone)]
pub struct InvitationService {
    directory: Arc<dyn DirectoryRepository>,
    invitations: Arc<dyn InvitationRepository>,
    mailer: Arc<dyn InvitationMailer>,
    notifications: Arc<dyn NotificationSink>,
    stats: StatsService,
    clock: Arc<dyn Clock>,
    config: InvitationServiceConfig,
}

impl InvitationService {
    pub fn new(
        repositories: &Repositories,
        mailer: Arc<dyn InvitationMailer>,
        notifications: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: InvitationServiceConfig,
    ) -> Self {
        Self {
            directory: repositories.directory.clone(),
            invitations: repositories.invitations.clone(),
            mailer,
            notifications,
            stats: StatsService::new(repositories, clock.clone()),
            clock,
            config,
        }
    }

    pub fn policy(&self) -> &InvitationPolicy {
        &self.config.policy
    }

    #[tracing::instrument(skip(self, request), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn invite(
        &self,
        actor: &Actor,
        request: InviteRequest,
    ) -> Result<Invitation, AppError> {
        request.validate()?;
        if request.hourly_rate.is_some_and(|rate| rate < Decimal::ZERO) {
            return Err(AppError::InvalidInput(
                "Hourly rate must not be negative".to_string(),
            ));
        }
        require_manager(actor)?;

        let organization = self.active_organization(actor.organization_id).await?;
        self.ensure_seats(&organization, 1).await?;

        if !actor.role.can_invite(request.role) {
            return Err(AppError::InsufficientPermission {
                required: Role::required_to_invite(request.role),
            });
        }

        let email = normalize_email(&request.email);
        let now = self.clock.now();
        self.ensure_invitable(actor.organization_id, &email, now)
            .await?;

        let inviter = self.inviter(actor).await?;
        let invitation = self.build_invitation(
            &organization,
            &inviter,
            email,
            request.role,
            request.message,
            request.permissions,
            InvitationMetadata {
                department: request.department,
                job_title: request.job_title,
                hourly_rate: request.hourly_rate,
            },
            now,
        );
        let mut invitation = self.invitations.insert(&invitation).await?;

        if let Err(error) = self.deliver(&mut invitation, false).await {
            tracing::warn!(
                invitation_id = %invitation.id,
                error = %error,
                "Invitation created but email delivery failed"
            );
        }
        let invitation = self.invitations.save(&invitation).await?;

        tracing::info!(
            invitation_id = %invitation.id,
            role = %invitation.role,
            email_delivered = invitation.email_delivered,
            "Invitation created"
        );
        Ok(invitation)
    }

    /// Invites up to 50 people at once. The seat check covers the whole batch; per-entry
    /// problems are reported in the result instead of failing the call.
    #[tracing::instrument(skip(self, entries, default_message), fields(organization_id = %actor.organization_id, count = entries.len()))]
    pub async fn bulk_invite(
        &self,
        actor: &Actor,
        entries: Vec<BulkInviteEntry>,
        default_message: Option<String>,
    ) -> Result<BulkInviteResult, AppError> {
        if entries.is_empty() || entries.len() > MAX_BULK_INVITES {
            return Err(AppError::InvalidInput(format!(
                "Between 1 and {} invitations are allowed per request",
                MAX_BULK_INVITES
            )));
        }
        if default_message.as_deref().is_some_and(|m| m.chars().count() > 500) {
            return Err(AppError::InvalidInput(
                "Message must be at most 500 characters".to_string(),
            ));
        }
        require_manager(actor)?;

        let organization = self.active_organization(actor.organization_id).await?;
        self.ensure_seats(&organization, entries.len() as i32)
            .await?;
        let inviter = self.inviter(actor).await?;

        let mut result = BulkInviteResult::default();
        for entry in entries {
            let email = normalize_email(&entry.email);
            if !email.validate_email() {
                result.failed.push(BulkInviteFailure {
                    email,
                    error: "Invalid email address".to_string(),
                });
                continue;
            }
            if !actor.role.can_invite(entry.role) {
                result.failed.push(BulkInviteFailure {
                    email,
                    error: format!("Insufficient permissions to invite {}", entry.role),
                });
                continue;
            }

            let now = self.clock.now();
            match self
                .ensure_invitable(actor.organization_id, &email, now)
                .await
            {
                Ok(()) => {}
                Err(AppError::UserAlreadyExists { .. }) => {
                    result.skipped.push(BulkInviteSkip {
                        email,
                        reason: "User already exists".to_string(),
                    });
                    continue;
                }
                Err(AppError::DuplicateInvitation { .. }) => {
                    result.skipped.push(BulkInviteSkip {
                        email,
                        reason: "Active invitation already exists".to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            }

            let invitation = self.build_invitation(
                &organization,
                &inviter,
                email.clone(),
                entry.role,
                default_message.clone(),
                PermissionOverrides::default(),
                InvitationMetadata::default(),
                now,
            );
            let mut invitation = match self.invitations.insert(&invitation).await {
                Ok(invitation) => invitation,
                Err(e) => {
                    tracing::warn!(error = %e, "Bulk invitation insert failed");
                    result.failed.push(BulkInviteFailure {
                        email,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let delivery = self.deliver(&mut invitation, false).await;
            if let Err(e) = self.invitations.save(&invitation).await {
                tracing::warn!(
                    invitation_id = %invitation.id,
                    error = %e,
                    "Bulk invitation update failed"
                );
                result.failed.push(BulkInviteFailure {
                    email,
                    error: e.to_string(),
                });
                continue;
            }
            match delivery {
                Ok(()) => result.sent.push(BulkInviteSent {
                    email,
                    role: invitation.role,
                    invitation_id: invitation.id,
                }),
                Err(error) => result.failed.push(BulkInviteFailure { email, error }),
            }
        }

        tracing::info!(
            sent = result.sent.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "Bulk invitation processed"
        );
        Ok(result)
    }

    /// Public view of an invitation for whoever holds the token. Records the click.
    #[tracing::instrument(skip(self, token, ip, user_agent))]
    pub async fn verify(
        &self,
        token: &str,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<InvitationPreview, AppError> {
        let now = self.clock.now();
        let mut invitation = self
            .invitations
            .find_pending_by_token(token, now)
            .await?
            .ok_or(AppError::InvalidOrExpiredInvitation)?;

        invitation.track_click(ip, user_agent, now);
        // Accepted or cancelled since the lookup.
        let invitation = match self.invitations.save(&invitation).await {
            Err(AppError::InvalidState(_)) => return Err(AppError::InvalidOrExpiredInvitation),
            other => other?,
        };

        Ok(invitation.preview(now))
    }

    /// Creates the invited user and closes the invitation in one atomic step.
    /// `password_hash` is produced by the authentication layer and stored as-is.
    #[tracing::instrument(skip(self, token, request))]
    pub async fn accept(
        &self,
        token: &str,
        request: AcceptRequest,
    ) -> Result<(User, Invitation), AppError> {
        request.validate()?;
        let now = self.clock.now();
        let mut invitation = self
            .invitations
            .find_pending_by_token(token, now)
            .await?
            .ok_or(AppError::InvalidOrExpiredInvitation)?;

        if let Some(existing) = self.directory.find_user_by_email(&invitation.email).await? {
            return Err(AppError::UserAlreadyExists {
                in_same_organization: existing.organization_id == invitation.organization_id,
            });
        }

        let organization = self
            .directory
            .find_organization(invitation.organization_id)
            .await?
            .filter(|o| o.is_active)
            .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))?;
        self.ensure_seats(&organization, 1).await?;

        let user = User {
            id: Uuid::new_v4(),
            organization_id: invitation.organization_id,
            email: invitation.email.clone(),
            name: request.name.trim().to_string(),
            password_hash: request.password_hash,
            role: invitation.role,
            is_active: true,
            hourly_rate: invitation.metadata.hourly_rate,
            permissions: invitation
                .permissions
                .apply(Permissions::for_role(invitation.role)),
            department: invitation.metadata.department.clone(),
            job_title: invitation.metadata.job_title.clone(),
            created_at: now,
            updated_at: now,
        };
        invitation.accept(user.id, now);
        let user = self.invitations.accept(&invitation, &user).await?;

        self.stats
            .after_membership_change(invitation.organization_id)
            .await;

        tracing::info!(
            invitation_id = %invitation.id,
            organization_id = %invitation.organization_id,
            user_id = %user.id,
            "Invitation accepted"
        );
        self.notifications.publish(TrackingEvent::InvitationAccepted {
            organization_id: invitation.organization_id,
            user_id: user.id,
            invitation_id: invitation.id,
            email: invitation.email.clone(),
        });

        Ok((user, invitation))
    }

    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn cancel(&self, actor: &Actor, invitation_id: Uuid) -> Result<Invitation, AppError> {
        let mut invitation = self.pending_managed(actor, invitation_id, "cancel").await?;
        invitation.cancel(actor.user_id, self.clock.now());
        let invitation = self.invitations.save(&invitation).await?;

        tracing::info!(invitation_id = %invitation.id, "Invitation cancelled");
        Ok(invitation)
    }

    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn extend(
        &self,
        actor: &Actor,
        invitation_id: Uuid,
        days: i64,
    ) -> Result<Invitation, AppError> {
        if !(MIN_EXTEND_DAYS..=MAX_EXTEND_DAYS).contains(&days) {
            return Err(AppError::InvalidInput(format!(
                "Days must be between {} and {}",
                MIN_EXTEND_DAYS, MAX_EXTEND_DAYS
            )));
        }
        let mut invitation = self.pending_managed(actor, invitation_id, "extend").await?;
        invitation.extend(days, self.clock.now());
        let invitation = self.invitations.save(&invitation).await?;

        tracing::info!(
            invitation_id = %invitation.id,
            days,
            expires_at = %invitation.expires_at,
            "Invitation extended"
        );
        Ok(invitation)
    }

    /// Issues a fresh token and resets click tracking. Returns the invitation and its new link.
    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn regenerate_token(
        &self,
        actor: &Actor,
        invitation_id: Uuid,
    ) -> Result<(Invitation, String), AppError> {
        let mut invitation = self
            .pending_managed(actor, invitation_id, "regenerate link for")
            .await?;
        invitation.regenerate_token(self.clock.now());
        let invitation = self.invitations.save(&invitation).await?;
        let url = invitation.invitation_url(&self.config.frontend_url);

        tracing::info!(invitation_id = %invitation.id, "Invitation link regenerated");
        Ok((invitation, url))
    }

    /// Sends a reminder, subject to the reminder limits of the policy.
    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn resend(&self, actor: &Actor, invitation_id: Uuid) -> Result<Invitation, AppError> {
        let mut invitation = self.managed(actor, invitation_id).await?;
        let now = self.clock.now();
        if let Some(reason) = invitation.reminder_block(now, &self.config.policy) {
            self.persist_expiry(&mut invitation, now).await?;
            tracing::debug!(invitation_id = %invitation.id, reason = %reason, "Reminder rejected");
            return Err(AppError::ReminderNotAllowed(reason));
        }

        match self.deliver(&mut invitation, true).await {
            Ok(()) => {
                invitation.mark_reminder_sent(now);
                let invitation = self.invitations.save(&invitation).await?;
                tracing::info!(
                    invitation_id = %invitation.id,
                    reminders_sent = invitation.reminders_sent,
                    "Invitation reminder sent"
                );
                Ok(invitation)
            }
            Err(error) => {
                self.invitations.save(&invitation).await?;
                tracing::warn!(
                    invitation_id = %invitation.id,
                    error = %error,
                    "Reminder delivery failed"
                );
                Err(AppError::Internal(format!(
                    "Failed to send reminder email: {}",
                    error
                )))
            }
        }
    }

    /// Invitations of the actor's organization, newest first, with expiry applied to `status`.
    pub async fn list(
        &self,
        actor: &Actor,
        status: Option<InvitationStatus>,
    ) -> Result<Vec<Invitation>, AppError> {
        require_manager(actor)?;
        let now = self.clock.now();
        let mut invitations = self
            .invitations
            .list(actor.organization_id, status, now)
            .await?;
        for invitation in &mut invitations {
            invitation.status = invitation.effective_status(now);
        }
        Ok(invitations)
    }

    pub async fn stats(&self, actor: &Actor) -> Result<Vec<InvitationStatusCount>, AppError> {
        require_manager(actor)?;
        self.invitations
            .status_counts(actor.organization_id, self.clock.now())
            .await
    }

    /// Pending invitations whose expiry has passed but whose status was not yet written back.
    pub async fn find_expired(&self, limit: i64) -> Result<Vec<Invitation>, AppError> {
        self.invitations.find_expired(self.clock.now(), limit).await
    }

    /// Writes the expired status of every stale pending invitation.
    #[tracing::instrument(skip(self))]
    pub async fn expire_stale(&self) -> Result<u64, AppError> {
        let expired = self.invitations.expire_pending(self.clock.now()).await?;
        if expired > 0 {
            tracing::info!(expired, "Expired stale invitations");
        }
        Ok(expired)
    }

    async fn active_organization(&self, organization_id: Uuid) -> Result<Organization, AppError> {
        self.directory
            .find_organization(organization_id)
            .await?
            .filter(|o| o.is_active)
            .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))
    }

    /// Seat check against a live member count rather than the cached stats.
    async fn ensure_seats(
        &self,
        organization: &Organization,
        additional: i32,
    ) -> Result<(), AppError> {
        let mut organization = organization.clone();
        organization.stats.total_users = self.directory.count_users(organization.id).await? as i32;
        if !organization.can_add_users(additional) {
            tracing::debug!(
                organization_id = %organization.id,
                total_users = organization.stats.total_users,
                max_users = organization.billing.max_users,
                "Seat limit reached"
            );
            return Err(AppError::SeatLimitReached {
                limit: organization.billing.max_users,
            });
        }
        Ok(())
    }

    /// Rejects emails that already belong to a user or have a live invitation here.
    async fn ensure_invitable(
        &self,
        organization_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(existing) = self.directory.find_user_by_email(email).await? {
            return Err(AppError::UserAlreadyExists {
                in_same_organization: existing.organization_id == organization_id,
            });
        }
        if let Some(pending) = self
            .invitations
            .find_pending_for_email(organization_id, email, now)
            .await?
        {
            return Err(AppError::DuplicateInvitation {
                invitation_id: pending.id,
                expires_at: pending.expires_at,
            });
        }
        Ok(())
    }

    async fn inviter(&self, actor: &Actor) -> Result<User, AppError> {
        self.directory
            .find_user(actor.user_id, actor.organization_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Inviting user not found".to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn build_invitation(
        &self,
        organization: &Organization,
        inviter: &User,
        email: String,
        role: Role,
        message: Option<String>,
        permissions: PermissionOverrides,
        metadata: InvitationMetadata,
        now: DateTime<Utc>,
    ) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            organization_id: organization.id,
            email,
            role,
            token: generate_token(),
            invited_by: inviter.id,
            inviter_name: inviter.name.clone(),
            inviter_email: inviter.email.clone(),
            organization_name: organization.name.clone(),
            status: InvitationStatus::Pending,
            message: message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
            permissions,
            metadata,
            expires_at: now + Duration::days(self.config.policy.expiry_days),
            accepted_at: None,
            accepted_by: None,
            cancelled_at: None,
            cancelled_by: None,
            reminders_sent: 0,
            last_reminder_sent: None,
            email_delivered: false,
            email_error: None,
            click_count: 0,
            last_clicked_at: None,
            click_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sends the invitation email and records the outcome on the invitation (not persisted).
    async fn deliver(&self, invitation: &mut Invitation, is_reminder: bool) -> Result<(), String> {
        let email =
            InvitationEmail::for_invitation(invitation, &self.config.frontend_url, is_reminder);
        match self.mailer.send_invitation(email).await {
            Ok(()) => {
                invitation.email_delivered = true;
                invitation.email_error = None;
                Ok(())
            }
            Err(error) => {
                invitation.email_delivered = false;
                invitation.email_error = Some(error.clone());
                Err(error)
            }
        }
    }

    async fn managed(&self, actor: &Actor, invitation_id: Uuid) -> Result<Invitation, AppError> {
        let invitation = self
            .invitations
            .find(invitation_id, actor.organization_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))?;
        if !invitation.can_manage(actor) {
            return Err(AppError::AccessDenied(
                "Not allowed to manage this invitation".to_string(),
            ));
        }
        Ok(invitation)
    }

    /// Loads a managed invitation that is still pending at the current time.
    async fn pending_managed(
        &self,
        actor: &Actor,
        invitation_id: Uuid,
        action: &str,
    ) -> Result<Invitation, AppError> {
        let mut invitation = self.managed(actor, invitation_id).await?;
        let now = self.clock.now();
        self.persist_expiry(&mut invitation, now).await?;
        if invitation.status != InvitationStatus::Pending {
            return Err(AppError::InvalidState(format!(
                "Cannot {} {} invitation",
                action, invitation.status
            )));
        }
        Ok(invitation)
    }

    /// Writes back a lazily observed expiry.
    async fn persist_expiry(
        &self,
        invitation: &mut Invitation,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if invitation.refresh_status(now) {
            *invitation = self.invitations.save(invitation).await?;
            tracing::debug!(invitation_id = %invitation.id, "Invitation marked expired");
        }
        Ok(())
    }
}

fn require_manager(actor: &Actor) -> Result<(), AppError> {
    if actor.is_manager_or_admin() {
        Ok(())
    } else {
        Err(AppError::InsufficientPermission {
            required: Role::Manager,
        })
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
