use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::PermissionOverrides;
use crate::policy::{Actor, Role};

const TOKEN_BYTES: usize = 32;
const MAX_CLICK_LOG: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "invitation_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Expired,
    Cancelled,
}

impl Display for InvitationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            InvitationStatus::Pending => write!(f, "pending"),
            InvitationStatus::Accepted => write!(f, "accepted"),
            InvitationStatus::Expired => write!(f, "expired"),
            InvitationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for InvitationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "expired" => Ok(InvitationStatus::Expired),
            "cancelled" => Ok(InvitationStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid invitation status: {}", s)),
        }
    }
}

/// Expiry and reminder limits for invitations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvitationPolicy {
    pub expiry_days: i64,
    pub max_reminders: i32,
    pub reminder_interval_hours: i64,
}

impl Default for InvitationPolicy {
    fn default() -> Self {
        Self {
            expiry_days: 7,
            max_reminders: 3,
            reminder_interval_hours: 24,
        }
    }
}

/// Profile data copied onto the user created at acceptance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InvitationMetadata {
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub hourly_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ClickRecord {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub clicked_at: DateTime<Utc>,
}

/// Generates a fresh 64-character hex token from 32 random bytes.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Invitation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: Role,
    /// Secret. Only ever leaves the core inside the invitation email.
    #[serde(skip_serializing)]
    pub token: String,
    pub invited_by: Uuid,
    pub inviter_name: String,
    pub inviter_email: String,
    pub organization_name: String,
    pub status: InvitationStatus,
    pub message: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub permissions: PermissionOverrides,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub metadata: InvitationMetadata,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Uuid>,
    pub reminders_sent: i32,
    pub last_reminder_sent: Option<DateTime<Utc>>,
    pub email_delivered: bool,
    pub email_error: Option<String>,
    pub click_count: i32,
    pub last_clicked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub click_log: Vec<ClickRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invitation {
    /// An invitation is usable while `expires_at > now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Status as observed at `now`: a pending invitation past its expiry reads as expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.status == InvitationStatus::Pending && self.is_expired(now) {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == InvitationStatus::Pending
    }

    /// Persists lazy expiry into `status`. Returns true when the status flipped.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) -> bool {
        let effective = self.effective_status(now);
        if effective != self.status {
            self.status = effective;
            self.updated_at = now;
            return true;
        }
        false
    }

    pub fn can_manage(&self, actor: &Actor) -> bool {
        actor.can_manage_invitation(self.organization_id, self.invited_by)
    }

    /// Why a reminder may not be sent right now, if anything blocks it.
    pub fn reminder_block(&self, now: DateTime<Utc>, policy: &InvitationPolicy) -> Option<String> {
        match self.effective_status(now) {
            InvitationStatus::Pending => {}
            InvitationStatus::Expired => {
                return Some(
                    "Invitation has expired. Please create a new invitation.".to_string(),
                )
            }
            other => return Some(format!("Cannot resend {} invitation", other)),
        }
        if self.reminders_sent >= policy.max_reminders {
            return Some(format!(
                "Maximum of {} reminders already sent",
                policy.max_reminders
            ));
        }
        if let Some(last) = self.last_reminder_sent {
            if now - last < Duration::hours(policy.reminder_interval_hours) {
                return Some("Reminder sent too recently".to_string());
            }
        }
        None
    }

    pub fn can_send_reminder(&self, now: DateTime<Utc>, policy: &InvitationPolicy) -> bool {
        self.reminder_block(now, policy).is_none()
    }

    pub fn accept(&mut self, user_id: Uuid, now: DateTime<Utc>) {
        self.status = InvitationStatus::Accepted;
        self.accepted_at = Some(now);
        self.accepted_by = Some(user_id);
        self.updated_at = now;
    }

    pub fn cancel(&mut self, by: Uuid, now: DateTime<Utc>) {
        self.status = InvitationStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancelled_by = Some(by);
        self.updated_at = now;
    }

    pub fn extend(&mut self, days: i64, now: DateTime<Utc>) {
        if self.status == InvitationStatus::Pending {
            self.expires_at += Duration::days(days);
            self.updated_at = now;
        }
    }

    /// Replaces the token and resets click tracking.
    pub fn regenerate_token(&mut self, now: DateTime<Utc>) {
        self.token = generate_token();
        self.click_count = 0;
        self.last_clicked_at = None;
        self.click_log.clear();
        self.updated_at = now;
    }

    pub fn mark_reminder_sent(&mut self, now: DateTime<Utc>) {
        self.reminders_sent += 1;
        self.last_reminder_sent = Some(now);
        self.updated_at = now;
    }

    pub fn track_click(
        &mut self,
        ip: Option<String>,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.click_count += 1;
        self.last_clicked_at = Some(now);
        self.click_log.push(ClickRecord {
            ip,
            user_agent,
            clicked_at: now,
        });
        if self.click_log.len() > MAX_CLICK_LOG {
            let excess = self.click_log.len() - MAX_CLICK_LOG;
            self.click_log.drain(..excess);
        }
        self.updated_at = now;
    }

    /// Whole days left before expiry, rounded up. `None` unless pending.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.until_expiry(now, 86_400)
    }

    pub fn hours_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.until_expiry(now, 3_600)
    }

    fn until_expiry(&self, now: DateTime<Utc>, unit_secs: i64) -> Option<i64> {
        if self.status != InvitationStatus::Pending {
            return None;
        }
        let remaining = (self.expires_at - now).num_seconds();
        Some(remaining.div_euclid(unit_secs) + i64::from(remaining.rem_euclid(unit_secs) > 0))
    }

    pub fn invitation_url(&self, frontend_url: &str) -> String {
        format!(
            "{}/accept-invitation?token={}",
            frontend_url.trim_end_matches('/'),
            self.token
        )
    }

    pub fn preview(&self, now: DateTime<Utc>) -> InvitationPreview {
        InvitationPreview {
            email: self.email.clone(),
            role: self.role,
            inviter_name: self.inviter_name.clone(),
            organization_name: self.organization_name.clone(),
            organization_id: self.organization_id,
            message: self.message.clone(),
            hours_until_expiry: self.hours_until_expiry(now),
        }
    }
}

/// Public view shown to someone holding the token.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvitationPreview {
    pub email: String,
    pub role: Role,
    pub inviter_name: String,
    pub organization_name: String,
    pub organization_id: Uuid,
    pub message: Option<String>,
    pub hours_until_expiry: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct InviteRequest {
    #[validate(email)]
    pub email: String,
    pub role: Role,
    #[validate(length(max = 500))]
    pub message: Option<String>,
    #[validate(length(max = 100))]
    pub department: Option<String>,
    #[validate(length(max = 100))]
    pub job_title: Option<String>,
    pub hourly_rate: Option<Decimal>,
    #[serde(default)]
    pub permissions: PermissionOverrides,
}

impl InviteRequest {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        Self {
            email: email.into(),
            role,
            message: None,
            department: None,
            job_title: None,
            hourly_rate: None,
            permissions: PermissionOverrides::default(),
        }
    }
}

/// One row of a bulk invitation request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BulkInviteEntry {
    pub email: String,
    #[serde(default = "default_bulk_role")]
    pub role: Role,
}

fn default_bulk_role() -> Role {
    Role::User
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AcceptRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Produced by the authentication layer; stored as-is.
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkInviteSent {
    pub email: String,
    pub role: Role,
    pub invitation_id: Uuid,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkInviteFailure {
    pub email: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkInviteSkip {
    pub email: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct BulkInviteResult {
    pub sent: Vec<BulkInviteSent>,
    pub failed: Vec<BulkInviteFailure>,
    pub skipped: Vec<BulkInviteSkip>,
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct InvitationStatusCount {
    pub status: InvitationStatus,
    pub count: i64,
    pub avg_click_count: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(now: DateTime<Utc>) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            email: "e@x.com".to_string(),
            role: Role::User,
            token: generate_token(),
            invited_by: Uuid::new_v4(),
            inviter_name: "Ada".to_string(),
            inviter_email: "ada@x.com".to_string(),
            organization_name: "Acme".to_string(),
            status: InvitationStatus::Pending,
            message: None,
            permissions: PermissionOverrides::default(),
            metadata: InvitationMetadata::default(),
            expires_at: now + Duration::days(7),
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

    #[test]
    fn test_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_token_never_serialized() {
        let inv = invitation(Utc::now());
        let json = serde_json::to_value(&inv).unwrap();
        assert!(json.get("token").is_none());
        assert!(json.get("click_log").is_none());
    }

    #[test]
    fn test_effective_status_is_lazy() {
        let now = Utc::now();
        let mut inv = invitation(now);
        inv.expires_at = now - Duration::seconds(1);
        assert_eq!(inv.status, InvitationStatus::Pending);
        assert_eq!(inv.effective_status(now), InvitationStatus::Expired);
        assert!(inv.refresh_status(now));
        assert_eq!(inv.status, InvitationStatus::Expired);
        assert!(!inv.refresh_status(now));
    }

    #[test]
    fn test_terminal_states_do_not_expire() {
        let now = Utc::now();
        let mut inv = invitation(now);
        inv.cancel(Uuid::new_v4(), now);
        let later = now + Duration::days(30);
        assert_eq!(inv.effective_status(later), InvitationStatus::Cancelled);
    }

    #[test]
    fn test_reminder_throttling() {
        let now = Utc::now();
        let policy = InvitationPolicy::default();
        let mut inv = invitation(now);
        assert!(inv.can_send_reminder(now, &policy));

        inv.mark_reminder_sent(now);
        assert!(!inv.can_send_reminder(now + Duration::hours(23), &policy));
        assert!(inv.can_send_reminder(now + Duration::hours(24), &policy));

        inv.reminders_sent = 3;
        assert!(!inv.can_send_reminder(now + Duration::hours(48), &policy));
    }

    #[test]
    fn test_click_log_keeps_last_ten() {
        let now = Utc::now();
        let mut inv = invitation(now);
        for i in 0..12 {
            inv.track_click(Some(format!("10.0.0.{}", i)), None, now);
        }
        assert_eq!(inv.click_count, 12);
        assert_eq!(inv.click_log.len(), 10);
        assert_eq!(inv.click_log[0].ip.as_deref(), Some("10.0.0.2"));

        inv.regenerate_token(now);
        assert_eq!(inv.click_count, 0);
        assert!(inv.click_log.is_empty());
    }

    #[test]
    fn test_days_until_expiry_rounds_up() {
        let now = Utc::now();
        let mut inv = invitation(now);
        inv.expires_at = now + Duration::hours(25);
        assert_eq!(inv.days_until_expiry(now), Some(2));
        assert_eq!(inv.hours_until_expiry(now), Some(25));
        inv.accept(Uuid::new_v4(), now);
        assert_eq!(inv.days_until_expiry(now), None);
    }

    #[test]
    fn test_extend_only_pending() {
        let now = Utc::now();
        let mut inv = invitation(now);
        let before = inv.expires_at;
        inv.extend(3, now);
        assert_eq!(inv.expires_at, before + Duration::days(3));

        inv.cancel(Uuid::new_v4(), now);
        inv.extend(3, now);
        assert_eq!(inv.expires_at, before + Duration::days(3));
    }

    #[test]
    fn test_invitation_url() {
        let inv = invitation(Utc::now());
        let url = inv.invitation_url("https://app.example.com/");
        assert_eq!(
            url,
            format!("https://app.example.com/accept-invitation?token={}", inv.token)
        );
    }
}
