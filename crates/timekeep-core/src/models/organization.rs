use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Billing limits attached to an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrganizationBilling {
    pub plan: String,
    pub max_users: i32,
    pub max_projects: i32,
}

impl Default for OrganizationBilling {
    fn default() -> Self {
        Self {
            plan: "free".to_string(),
            max_users: 5,
            max_projects: 3,
        }
    }
}

/// Denormalized counters. Recomputed on demand, never trusted for invariant checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct OrganizationStats {
    pub total_users: i32,
    pub active_users: i32,
    pub total_projects: i32,
    pub total_time_tracked: i64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Tenant root. Every other entity carries its `id` as `organization_id`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub admin_id: Uuid,
    pub is_active: bool,
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    pub billing: OrganizationBilling,
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    pub stats: OrganizationStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn can_add_users(&self, additional: i32) -> bool {
        self.stats.total_users + additional <= self.billing.max_users
    }

    pub fn can_add_projects(&self, additional: i32) -> bool {
        self.stats.total_projects + additional <= self.billing.max_projects
    }

    /// Seats still free according to the current stats.
    pub fn remaining_seats(&self) -> i32 {
        (self.billing.max_users - self.stats.total_users).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(total_users: i32, max_users: i32) -> Organization {
        Organization {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            slug: "acme".to_string(),
            admin_id: Uuid::new_v4(),
            is_active: true,
            billing: OrganizationBilling {
                max_users,
                ..Default::default()
            },
            stats: OrganizationStats {
                total_users,
                ..Default::default()
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_can_add_users_boundary() {
        assert!(org(4, 5).can_add_users(1));
        assert!(!org(5, 5).can_add_users(1));
        assert!(!org(4, 5).can_add_users(2));
        assert_eq!(org(7, 5).remaining_seats(), 0);
    }
}
