//! Hooks for collaborators outside the core
//!
//! The lifecycles publish events and send invitation emails through these
//! traits. Delivery transports live in `timekeep-services`; the no-op
//! implementations are used when a collaborator is not configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Invitation, TimeEntry};
use crate::policy::Role;

/// Change notification emitted after a lifecycle operation committed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    TimeStarted {
        organization_id: Uuid,
        user_id: Uuid,
        entry: TimeEntry,
    },
    TimeStopped {
        organization_id: Uuid,
        user_id: Uuid,
        entry: TimeEntry,
    },
    ManualEntryCreated {
        organization_id: Uuid,
        user_id: Uuid,
        entry: TimeEntry,
    },
    TimeEntryUpdated {
        organization_id: Uuid,
        user_id: Uuid,
        entry: TimeEntry,
    },
    TimeEntryDeleted {
        organization_id: Uuid,
        user_id: Uuid,
        entry_id: Uuid,
    },
    InvitationAccepted {
        organization_id: Uuid,
        user_id: Uuid,
        invitation_id: Uuid,
        email: String,
    },
}

impl TrackingEvent {
    pub fn organization_id(&self) -> Uuid {
        match self {
            TrackingEvent::TimeStarted {
                organization_id, ..
            }
            | TrackingEvent::TimeStopped {
                organization_id, ..
            }
            | TrackingEvent::ManualEntryCreated {
                organization_id, ..
            }
            | TrackingEvent::TimeEntryUpdated {
                organization_id, ..
            }
            | TrackingEvent::TimeEntryDeleted {
                organization_id, ..
            }
            | TrackingEvent::InvitationAccepted {
                organization_id, ..
            } => *organization_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TrackingEvent::TimeStarted { .. } => "time_started",
            TrackingEvent::TimeStopped { .. } => "time_stopped",
            TrackingEvent::ManualEntryCreated { .. } => "manual_entry_created",
            TrackingEvent::TimeEntryUpdated { .. } => "time_entry_updated",
            TrackingEvent::TimeEntryDeleted { .. } => "time_entry_deleted",
            TrackingEvent::InvitationAccepted { .. } => "invitation_accepted",
        }
    }
}

/// Fire-and-forget event sink. Delivery is at most once; publishing never fails the caller.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: TrackingEvent);
}

pub struct NoOpNotificationSink;

impl NotificationSink for NoOpNotificationSink {
    fn publish(&self, _event: TrackingEvent) {}
}

/// Everything a transport needs to deliver one invitation or reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationEmail {
    pub invitation_id: Uuid,
    pub to: String,
    pub organization_name: String,
    pub inviter_name: String,
    pub role: Role,
    pub message: Option<String>,
    pub invitation_url: String,
    pub expires_at: DateTime<Utc>,
    pub is_reminder: bool,
}

impl InvitationEmail {
    pub fn for_invitation(invitation: &Invitation, frontend_url: &str, is_reminder: bool) -> Self {
        Self {
            invitation_id: invitation.id,
            to: invitation.email.clone(),
            organization_name: invitation.organization_name.clone(),
            inviter_name: invitation.inviter_name.clone(),
            role: invitation.role,
            message: invitation.message.clone(),
            invitation_url: invitation.invitation_url(frontend_url),
            expires_at: invitation.expires_at,
            is_reminder,
        }
    }

    pub fn subject(&self) -> String {
        if self.is_reminder {
            format!("Reminder: join {} on Timekeep", self.organization_name)
        } else {
            format!(
                "{} invited you to join {} on Timekeep",
                self.inviter_name, self.organization_name
            )
        }
    }

    pub fn text_body(&self) -> String {
        let mut body = format!(
            "{} has invited you to join {} as {}.\n\n",
            self.inviter_name, self.organization_name, self.role
        );
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            body.push_str(&format!("Message from {}:\n{}\n\n", self.inviter_name, message));
        }
        body.push_str(&format!(
            "Accept the invitation here:\n{}\n\nThis invitation expires on {}.\n",
            self.invitation_url,
            self.expires_at.format("%Y-%m-%d %H:%M UTC")
        ));
        body
    }
}

/// Transport for invitation emails. An `Err` carries a human readable reason that is
/// stored on the invitation as `email_error`.
#[async_trait]
pub trait InvitationMailer: Send + Sync {
    async fn send_invitation(&self, email: InvitationEmail) -> Result<(), String>;
}

/// Used when email is disabled. Reports every message as delivered.
pub struct NoOpInvitationMailer;

#[async_trait]
impl InvitationMailer for NoOpInvitationMailer {
    async fn send_invitation(&self, email: InvitationEmail) -> Result<(), String> {
        tracing::debug!(
            invitation_id = %email.invitation_id,
            "Email disabled, skipping invitation delivery"
        );
        Ok(())
    }
}
