use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::Role;

/// Organization-specific permission flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    pub can_create_projects: bool,
    pub can_manage_team: bool,
    pub can_view_reports: bool,
    pub can_manage_integrations: bool,
    pub can_export_data: bool,
}

impl Permissions {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Admin => Self {
                can_create_projects: true,
                can_manage_team: true,
                can_view_reports: true,
                can_manage_integrations: true,
                can_export_data: true,
            },
            Role::Manager => Self {
                can_create_projects: true,
                can_manage_team: true,
                can_view_reports: true,
                can_manage_integrations: false,
                can_export_data: true,
            },
            Role::User => Self {
                can_view_reports: true,
                ..Default::default()
            },
        }
    }
}

/// Partial permission override carried by an invitation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverrides {
    pub can_create_projects: Option<bool>,
    pub can_manage_team: Option<bool>,
    pub can_view_reports: Option<bool>,
    pub can_manage_integrations: Option<bool>,
    pub can_export_data: Option<bool>,
}

impl PermissionOverrides {
    pub fn apply(&self, base: Permissions) -> Permissions {
        Permissions {
            can_create_projects: self.can_create_projects.unwrap_or(base.can_create_projects),
            can_manage_team: self.can_manage_team.unwrap_or(base.can_manage_team),
            can_view_reports: self.can_view_reports.unwrap_or(base.can_view_reports),
            can_manage_integrations: self
                .can_manage_integrations
                .unwrap_or(base.can_manage_integrations),
            can_export_data: self.can_export_data.unwrap_or(base.can_export_data),
        }
    }
}

/// Member of exactly one organization. Email is unique across all organizations.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct User {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    /// Billing profile rate. `None` means the user is not billed.
    pub hourly_rate: Option<Decimal>,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub permissions: Permissions,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Rate applied to new time entries.
    pub fn billing_rate(&self) -> Decimal {
        self.hourly_rate.unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_only_touch_set_flags() {
        let base = Permissions::for_role(Role::User);
        let overrides = PermissionOverrides {
            can_export_data: Some(true),
            can_view_reports: Some(false),
            ..Default::default()
        };
        let merged = overrides.apply(base);
        assert!(merged.can_export_data);
        assert!(!merged.can_view_reports);
        assert!(!merged.can_manage_team);
    }
}
