//! Role policy shared by the time tracking and invitation lifecycles.
//!
//! Every permission predicate lives here so the lifecycles never compare role
//! strings themselves.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Organization role. Used by both `User` and `Invitation`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "member_role", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn is_manager_or_admin(self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }

    /// Role-escalation rule: managers may only invite plain users, admins may invite anyone.
    pub fn can_invite(self, invited: Role) -> bool {
        match self {
            Role::Admin => true,
            Role::Manager => invited == Role::User,
            Role::User => false,
        }
    }

    /// Minimum role an inviter needs to hand out `invited`.
    pub fn required_to_invite(invited: Role) -> Role {
        match invited {
            Role::User => Role::Manager,
            Role::Manager | Role::Admin => Role::Admin,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Manager => write!(f, "manager"),
            Role::User => write!(f, "user"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "user" => Ok(Role::User),
            _ => Err(anyhow::anyhow!("Invalid role: {}", s)),
        }
    }
}

/// The already-authenticated caller of a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, organization_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            organization_id,
            role,
        }
    }

    pub fn is_manager_or_admin(&self) -> bool {
        self.role.is_manager_or_admin()
    }

    /// Project access: admin/manager, a member, or the project's manager.
    pub fn can_track_on_project(&self, manager_id: Uuid, members: &[Uuid]) -> bool {
        self.is_manager_or_admin() || manager_id == self.user_id || members.contains(&self.user_id)
    }

    /// Task access: admin/manager, the assignee, the creator, or a watcher.
    pub fn can_track_on_task(
        &self,
        assignee_id: Option<Uuid>,
        created_by: Uuid,
        watchers: &[Uuid],
    ) -> bool {
        self.is_manager_or_admin()
            || assignee_id == Some(self.user_id)
            || created_by == self.user_id
            || watchers.contains(&self.user_id)
    }

    /// Invitation management: the original inviter, or an admin/manager of the same organization.
    pub fn can_manage_invitation(&self, organization_id: Uuid, invited_by: Uuid) -> bool {
        if self.organization_id != organization_id {
            return false;
        }
        invited_by == self.user_id || self.is_manager_or_admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(role: Role) -> Actor {
        Actor::new(Uuid::new_v4(), Uuid::new_v4(), role)
    }

    #[test]
    fn test_role_display_and_parse() {
        for role in [Role::Admin, Role::Manager, Role::User] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_escalation_rule() {
        assert!(Role::Admin.can_invite(Role::Admin));
        assert!(Role::Admin.can_invite(Role::Manager));
        assert!(Role::Manager.can_invite(Role::User));
        assert!(!Role::Manager.can_invite(Role::Manager));
        assert!(!Role::Manager.can_invite(Role::Admin));
        assert!(!Role::User.can_invite(Role::User));
        assert_eq!(Role::required_to_invite(Role::Manager), Role::Admin);
        assert_eq!(Role::required_to_invite(Role::User), Role::Manager);
    }

    #[test]
    fn test_project_access() {
        let user = actor(Role::User);
        let manager_id = Uuid::new_v4();
        assert!(!user.can_track_on_project(manager_id, &[]));
        assert!(user.can_track_on_project(manager_id, &[user.user_id]));
        assert!(user.can_track_on_project(user.user_id, &[]));
        assert!(actor(Role::Manager).can_track_on_project(manager_id, &[]));
    }

    #[test]
    fn test_task_access() {
        let user = actor(Role::User);
        let creator = Uuid::new_v4();
        assert!(!user.can_track_on_task(None, creator, &[]));
        assert!(user.can_track_on_task(Some(user.user_id), creator, &[]));
        assert!(user.can_track_on_task(None, user.user_id, &[]));
        assert!(user.can_track_on_task(None, creator, &[user.user_id]));
        assert!(actor(Role::Admin).can_track_on_task(None, creator, &[]));
    }

    #[test]
    fn test_invitation_management_is_tenant_scoped() {
        let manager = actor(Role::Manager);
        assert!(manager.can_manage_invitation(manager.organization_id, Uuid::new_v4()));
        assert!(!manager.can_manage_invitation(Uuid::new_v4(), manager.user_id));

        let user = actor(Role::User);
        assert!(user.can_manage_invitation(user.organization_id, user.user_id));
        assert!(!user.can_manage_invitation(user.organization_id, Uuid::new_v4()));
    }
}
