use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use timekeep_core::models::{Invitation, InvitationStatus, InvitationStatusCount, User};
use timekeep_core::AppError;
use uuid::Uuid;

use super::directory::insert_user;
use crate::db::transaction::TransactionGuard;

const INVITATION_COLUMNS: &str = "id, organization_id, email, role, token, invited_by, \
    inviter_name, inviter_email, organization_name, status, message, permissions, metadata, \
    expires_at, accepted_at, accepted_by, cancelled_at, cancelled_by, reminders_sent, \
    last_reminder_sent, email_delivered, email_error, click_count, last_clicked_at, click_log, \
    created_at, updated_at";

/// Status as seen at `$2`: pending rows past their expiry read as expired.
const EFFECTIVE_STATUS: &str = "CASE WHEN status = 'pending' AND expires_at <= $2 \
    THEN 'expired'::invitation_status ELSE status END";

#[async_trait]
pub trait InvitationRepository: Send + Sync {
    async fn insert(&self, invitation: &Invitation) -> Result<Invitation, AppError>;

    async fn find(&self, id: Uuid, organization_id: Uuid) -> Result<Option<Invitation>, AppError>;

    /// Pending invitation with this token whose `expires_at` is after `now`.
    async fn find_pending_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, AppError>;

    /// Pending, unexpired invitation for `email` in the organization.
    async fn find_pending_for_email(
        &self,
        organization_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, AppError>;

    /// Persists every mutable field of the invitation, provided the stored row is
    /// still pending. A row that reached a terminal status in the meantime is left
    /// untouched and the call fails with `InvalidState`.
    async fn save(&self, invitation: &Invitation) -> Result<Invitation, AppError>;

    /// Creates `user` and marks `invitation` accepted in one transaction. Fails with
    /// `InvalidOrExpiredInvitation` if the invitation stopped being pending meanwhile.
    async fn accept(&self, invitation: &Invitation, user: &User) -> Result<User, AppError>;

    /// Newest first. `status` filters on the effective status at `now`.
    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<InvitationStatus>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, AppError>;

    /// Invitations still stored as pending although `expires_at` has passed.
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invitation>, AppError>;

    /// Persists the expired status of every stale pending invitation. Returns how many changed.
    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn status_counts(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<InvitationStatusCount>, AppError>;
}

#[derive(Clone)]
pub struct PgInvitationRepository {
    pool: PgPool,
}

impl PgInvitationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Rejection for a write that raced with a terminal transition.
pub(crate) fn not_pending(current: &Invitation) -> AppError {
    AppError::InvalidState(format!("Invitation is already {}", current.status))
}

#[async_trait]
impl InvitationRepository for PgInvitationRepository {
    #[tracing::instrument(skip(self, invitation), fields(db.table = "invitations", db.operation = "insert", db.record_id = %invitation.id))]
    async fn insert(&self, invitation: &Invitation) -> Result<Invitation, AppError> {
        let query = format!(
            r#"
            INSERT INTO invitations (
                id, organization_id, email, role, token, invited_by, inviter_name,
                inviter_email, organization_name, status, message, permissions, metadata,
                expires_at, reminders_sent, email_delivered, click_count, click_log,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20)
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        );

        let inserted = sqlx::query_as::<Postgres, Invitation>(&query)
            .bind(invitation.id)
            .bind(invitation.organization_id)
            .bind(&invitation.email)
            .bind(invitation.role)
            .bind(&invitation.token)
            .bind(invitation.invited_by)
            .bind(&invitation.inviter_name)
            .bind(&invitation.inviter_email)
            .bind(&invitation.organization_name)
            .bind(invitation.status)
            .bind(&invitation.message)
            .bind(Json(&invitation.permissions))
            .bind(Json(&invitation.metadata))
            .bind(invitation.expires_at)
            .bind(invitation.reminders_sent)
            .bind(invitation.email_delivered)
            .bind(invitation.click_count)
            .bind(Json(&invitation.click_log))
            .bind(invitation.created_at)
            .bind(invitation.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(inserted)
    }

    #[tracing::instrument(skip(self), fields(db.table = "invitations", db.operation = "select", db.record_id = %id))]
    async fn find(&self, id: Uuid, organization_id: Uuid) -> Result<Option<Invitation>, AppError> {
        let query = format!(
            "SELECT {} FROM invitations WHERE id = $1 AND organization_id = $2",
            INVITATION_COLUMNS
        );
        let invitation = sqlx::query_as::<Postgres, Invitation>(&query)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invitation)
    }

    #[tracing::instrument(skip(self, token), fields(db.table = "invitations", db.operation = "select"))]
    async fn find_pending_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, AppError> {
        let query = format!(
            "SELECT {} FROM invitations WHERE token = $1 AND status = 'pending' AND expires_at > $2",
            INVITATION_COLUMNS
        );
        let invitation = sqlx::query_as::<Postgres, Invitation>(&query)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invitation)
    }

    #[tracing::instrument(skip(self), fields(db.table = "invitations", db.operation = "select"))]
    async fn find_pending_for_email(
        &self,
        organization_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, AppError> {
        let query = format!(
            r#"
            SELECT {} FROM invitations
            WHERE organization_id = $1 AND email = $2 AND status = 'pending' AND expires_at > $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            INVITATION_COLUMNS
        );
        let invitation = sqlx::query_as::<Postgres, Invitation>(&query)
            .bind(organization_id)
            .bind(email)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        Ok(invitation)
    }

    #[tracing::instrument(skip(self, invitation), fields(db.table = "invitations", db.operation = "update", db.record_id = %invitation.id))]
    async fn save(&self, invitation: &Invitation) -> Result<Invitation, AppError> {
        let query = format!(
            r#"
            UPDATE invitations
            SET token = $3, status = $4, expires_at = $5, accepted_at = $6, accepted_by = $7,
                cancelled_at = $8, cancelled_by = $9, reminders_sent = $10,
                last_reminder_sent = $11, email_delivered = $12, email_error = $13,
                click_count = $14, last_clicked_at = $15, click_log = $16, updated_at = $17
            WHERE id = $1 AND organization_id = $2 AND status = 'pending'
            RETURNING {}
            "#,
            INVITATION_COLUMNS
        );

        let saved = sqlx::query_as::<Postgres, Invitation>(&query)
            .bind(invitation.id)
            .bind(invitation.organization_id)
            .bind(&invitation.token)
            .bind(invitation.status)
            .bind(invitation.expires_at)
            .bind(invitation.accepted_at)
            .bind(invitation.accepted_by)
            .bind(invitation.cancelled_at)
            .bind(invitation.cancelled_by)
            .bind(invitation.reminders_sent)
            .bind(invitation.last_reminder_sent)
            .bind(invitation.email_delivered)
            .bind(&invitation.email_error)
            .bind(invitation.click_count)
            .bind(invitation.last_clicked_at)
            .bind(Json(&invitation.click_log))
            .bind(invitation.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        match saved {
            Some(saved) => Ok(saved),
            None => match self.find(invitation.id, invitation.organization_id).await? {
                Some(current) => Err(not_pending(&current)),
                None => Err(AppError::NotFound("Invitation not found".to_string())),
            },
        }
    }

    #[tracing::instrument(skip(self, invitation, user), fields(db.table = "invitations", db.operation = "accept", db.record_id = %invitation.id))]
    async fn accept(&self, invitation: &Invitation, user: &User) -> Result<User, AppError> {
        let mut tx = TransactionGuard::begin(&self.pool, "accept_invitation").await?;

        let created = match insert_user(tx.conn()?, user).await {
            Ok(created) => created,
            Err(e) => {
                tx.rollback().await?;
                return Err(e);
            }
        };

        let accepted_at = invitation.accepted_at.unwrap_or(invitation.updated_at);
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET status = 'accepted', accepted_at = $3, accepted_by = $4, updated_at = $3
            WHERE id = $1 AND organization_id = $2 AND status = 'pending' AND expires_at > $3
            "#,
        )
        .bind(invitation.id)
        .bind(invitation.organization_id)
        .bind(accepted_at)
        .bind(created.id)
        .execute(tx.conn()?)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                tx.commit().await?;
                Ok(created)
            }
            Ok(_) => {
                tx.rollback().await?;
                Err(AppError::InvalidOrExpiredInvitation)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e.into())
            }
        }
    }

    #[tracing::instrument(skip(self), fields(db.table = "invitations", db.operation = "select"))]
    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<InvitationStatus>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, AppError> {
        let query = format!(
            r#"
            SELECT {} FROM invitations
            WHERE organization_id = $1 AND ($3::invitation_status IS NULL OR {} = $3)
            ORDER BY created_at DESC
            "#,
            INVITATION_COLUMNS, EFFECTIVE_STATUS
        );
        let invitations = sqlx::query_as::<Postgres, Invitation>(&query)
            .bind(organization_id)
            .bind(now)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        Ok(invitations)
    }

    #[tracing::instrument(skip(self), fields(db.table = "invitations", db.operation = "select"))]
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invitation>, AppError> {
        let query = format!(
            r#"
            SELECT {} FROM invitations
            WHERE status = 'pending' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
            INVITATION_COLUMNS
        );
        let invitations = sqlx::query_as::<Postgres, Invitation>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(invitations)
    }

    #[tracing::instrument(skip(self), fields(db.table = "invitations", db.operation = "update"))]
    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET status = 'expired', updated_at = $1
            WHERE status = 'pending' AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "invitations", db.operation = "aggregate"))]
    async fn status_counts(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<InvitationStatusCount>, AppError> {
        let query = format!(
            r#"
            SELECT effective_status, COUNT(*), COALESCE(AVG(click_count), 0)::float8
            FROM (
                SELECT {} AS effective_status, click_count
                FROM invitations
                WHERE organization_id = $1
            ) s
            GROUP BY effective_status
            ORDER BY effective_status
            "#,
            EFFECTIVE_STATUS
        );
        let rows = sqlx::query_as::<Postgres, (InvitationStatus, i64, f64)>(&query)
            .bind(organization_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count, avg_click_count)| InvitationStatusCount {
                status,
                count,
                avg_click_count,
            })
            .collect())
    }
}
