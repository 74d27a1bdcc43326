//! In-memory repositories
//!
//! [`InMemoryStore`] implements every repository trait over one mutex-guarded
//! state, so conditional writes (open entry insert, close, invitation accept)
//! are atomic in the same way the PostgreSQL constraints make them. Used by the
//! service tests and for running the services without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use timekeep_core::models::{
    EntryQuery, Invitation, InvitationStatus, InvitationStatusCount, Organization,
    OrganizationStats, Project, ProjectStats, ProjectStatus, Task, TaskStatus, TimeEntry, User,
};
use timekeep_core::AppError;
use uuid::Uuid;

use crate::db::control::invitation::not_pending;
use crate::db::control::{DirectoryRepository, InvitationRepository};
use crate::db::tracking::{EntryTotals, OpenInsert, ProjectRepository, TimeEntryRepository};

#[derive(Default)]
struct State {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
    projects: HashMap<Uuid, Project>,
    tasks: HashMap<Uuid, Task>,
    entries: HashMap<Uuid, TimeEntry>,
    invitations: HashMap<Uuid, Invitation>,
    fail_stats_writes: bool,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_organization(&self, organization: Organization) {
        self.state()
            .organizations
            .insert(organization.id, organization);
    }

    pub fn add_user(&self, user: User) {
        self.state().users.insert(user.id, user);
    }

    pub fn add_project(&self, project: Project) {
        self.state().projects.insert(project.id, project);
    }

    pub fn add_task(&self, task: Task) {
        self.state().tasks.insert(task.id, task);
    }

    pub fn add_invitation(&self, invitation: Invitation) {
        self.state().invitations.insert(invitation.id, invitation);
    }

    pub fn organization(&self, id: Uuid) -> Option<Organization> {
        self.state().organizations.get(&id).cloned()
    }

    pub fn project(&self, id: Uuid) -> Option<Project> {
        self.state().projects.get(&id).cloned()
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.state().tasks.get(&id).cloned()
    }

    pub fn entry(&self, id: Uuid) -> Option<TimeEntry> {
        self.state().entries.get(&id).cloned()
    }

    pub fn invitation(&self, id: Uuid) -> Option<Invitation> {
        self.state().invitations.get(&id).cloned()
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        self.state()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
    }

    /// Open entries of one user in one organization.
    pub fn open_entries(&self, organization_id: Uuid, user_id: Uuid) -> Vec<TimeEntry> {
        self.state()
            .entries
            .values()
            .filter(|e| e.organization_id == organization_id && e.user_id == user_id && e.is_open())
            .cloned()
            .collect()
    }

    /// Makes every stats write fail, to exercise best-effort recomputation.
    pub fn fail_stats_writes(&self, fail: bool) {
        self.state().fail_stats_writes = fail;
    }
}

fn matches_query(
    entry: &TimeEntry,
    organization_id: Uuid,
    user_id: Uuid,
    query: &EntryQuery,
) -> bool {
    entry.organization_id == organization_id
        && entry.user_id == user_id
        && query.project_id.map_or(true, |p| entry.project_id == p)
        && query.task_id.map_or(true, |t| entry.task_id == Some(t))
        && query.from.map_or(true, |from| entry.start_time >= from)
        && query.to.map_or(true, |to| entry.start_time <= to)
}

fn totals<'a>(entries: impl Iterator<Item = &'a TimeEntry>) -> EntryTotals {
    entries
        .filter(|e| !e.is_open())
        .fold(EntryTotals::default(), |mut acc, e| {
            acc.duration += e.duration;
            acc.amount += e.total_amount;
            acc.last_activity = acc.last_activity.max(e.end_time);
            acc
        })
}

fn stats_write_failure() -> AppError {
    AppError::Internal("Stats write rejected".to_string())
}

#[async_trait]
impl DirectoryRepository for InMemoryStore {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError> {
        Ok(self.state().organizations.get(&id).cloned())
    }

    async fn find_user(&self, id: Uuid, organization_id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self
            .state()
            .users
            .get(&id)
            .filter(|u| u.organization_id == organization_id)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.user_by_email(email))
    }

    async fn count_users(&self, organization_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .state()
            .users
            .values()
            .filter(|u| u.organization_id == organization_id)
            .count() as i64)
    }

    async fn count_active_users(&self, organization_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .state()
            .users
            .values()
            .filter(|u| u.organization_id == organization_id && u.is_active)
            .count() as i64)
    }

    async fn create_user(&self, user: &User) -> Result<User, AppError> {
        let mut state = self.state();
        if let Some(existing) = state.users.values().find(|u| u.email == user.email) {
            return Err(AppError::UserAlreadyExists {
                in_same_organization: existing.organization_id == user.organization_id,
            });
        }
        state.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn save_organization_stats(
        &self,
        organization_id: Uuid,
        stats: &OrganizationStats,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        if state.fail_stats_writes {
            return Err(stats_write_failure());
        }
        if let Some(organization) = state.organizations.get_mut(&organization_id) {
            organization.stats = stats.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for InMemoryStore {
    async fn find_project(
        &self,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        Ok(self
            .state()
            .projects
            .get(&id)
            .filter(|p| p.organization_id == organization_id)
            .cloned())
    }

    async fn oldest_active_project(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        Ok(self
            .state()
            .projects
            .values()
            .filter(|p| {
                p.organization_id == organization_id && p.status == ProjectStatus::Active
            })
            .min_by_key(|p| (p.created_at, p.id))
            .cloned())
    }

    async fn count_projects(&self, organization_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .state()
            .projects
            .values()
            .filter(|p| p.organization_id == organization_id)
            .count() as i64)
    }

    async fn find_task(
        &self,
        id: Uuid,
        organization_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Task>, AppError> {
        Ok(self
            .state()
            .tasks
            .get(&id)
            .filter(|t| t.organization_id == organization_id && t.project_id == project_id)
            .cloned())
    }

    async fn save_task(&self, task: &Task) -> Result<(), AppError> {
        let mut state = self.state();
        if let Some(stored) = state
            .tasks
            .get_mut(&task.id)
            .filter(|t| t.organization_id == task.organization_id)
        {
            *stored = task.clone();
        }
        Ok(())
    }

    async fn task_counts(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> Result<(i64, i64), AppError> {
        let state = self.state();
        let tasks: Vec<&Task> = state
            .tasks
            .values()
            .filter(|t| t.project_id == project_id && t.organization_id == organization_id)
            .collect();
        let completed = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        Ok((tasks.len() as i64, completed as i64))
    }

    async fn save_project_stats(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
        stats: &ProjectStats,
    ) -> Result<(), AppError> {
        let mut state = self.state();
        if state.fail_stats_writes {
            return Err(stats_write_failure());
        }
        if let Some(project) = state
            .projects
            .get_mut(&project_id)
            .filter(|p| p.organization_id == organization_id)
        {
            project.stats = stats.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl TimeEntryRepository for InMemoryStore {
    async fn insert_open(&self, entry: &TimeEntry) -> Result<OpenInsert, AppError> {
        let mut state = self.state();
        if let Some(existing) = state.entries.values().find(|e| {
            e.organization_id == entry.organization_id && e.user_id == entry.user_id && e.is_open()
        }) {
            return Ok(OpenInsert::ActiveExists(existing.id));
        }
        state.entries.insert(entry.id, entry.clone());
        Ok(OpenInsert::Inserted(entry.clone()))
    }

    async fn insert_closed(&self, entry: &TimeEntry) -> Result<TimeEntry, AppError> {
        self.state().entries.insert(entry.id, entry.clone());
        Ok(entry.clone())
    }

    async fn find_open_for_user(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError> {
        Ok(self.open_entries(organization_id, user_id).into_iter().next())
    }

    async fn find_open(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError> {
        Ok(self
            .find_owned(id, organization_id, user_id)
            .await?
            .filter(TimeEntry::is_open))
    }

    async fn find_owned(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError> {
        Ok(self
            .state()
            .entries
            .get(&id)
            .filter(|e| e.organization_id == organization_id && e.user_id == user_id)
            .cloned())
    }

    async fn close(&self, entry: &TimeEntry) -> Result<Option<TimeEntry>, AppError> {
        let mut state = self.state();
        let Some(stored) = state.entries.get_mut(&entry.id).filter(|e| {
            e.organization_id == entry.organization_id && e.user_id == entry.user_id && e.is_open()
        }) else {
            return Ok(None);
        };
        stored.end_time = entry.end_time;
        stored.duration = entry.duration;
        stored.total_amount = entry.total_amount;
        stored.updated_at = entry.updated_at;
        Ok(Some(stored.clone()))
    }

    async fn update(&self, entry: &TimeEntry) -> Result<TimeEntry, AppError> {
        let mut state = self.state();
        let stored = state
            .entries
            .get_mut(&entry.id)
            .filter(|e| e.organization_id == entry.organization_id && e.user_id == entry.user_id)
            .ok_or_else(|| AppError::NotFound("Time entry not found".to_string()))?;
        *stored = entry.clone();
        Ok(entry.clone())
    }

    async fn delete_closed(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let mut state = self.state();
        let deletable = state.entries.get(&id).is_some_and(|e| {
            e.organization_id == organization_id && e.user_id == user_id && !e.is_open()
        });
        if deletable {
            state.entries.remove(&id);
        }
        Ok(deletable)
    }

    async fn list(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        query: &EntryQuery,
    ) -> Result<Vec<TimeEntry>, AppError> {
        let state = self.state();
        let mut entries: Vec<TimeEntry> = state
            .entries
            .values()
            .filter(|e| matches_query(e, organization_id, user_id, query))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        Ok(entries
            .into_iter()
            .skip(query.offset().max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn count(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        query: &EntryQuery,
    ) -> Result<i64, AppError> {
        Ok(self
            .state()
            .entries
            .values()
            .filter(|e| matches_query(e, organization_id, user_id, query))
            .count() as i64)
    }

    async fn closed_between(
        &self,
        organization_id: Uuid,
        user_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, AppError> {
        let state = self.state();
        let mut entries: Vec<TimeEntry> = state
            .entries
            .values()
            .filter(|e| {
                e.organization_id == organization_id
                    && user_id.map_or(true, |u| e.user_id == u)
                    && e.start_time >= from
                    && e.start_time < to
                    && !e.is_open()
            })
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.start_time);
        Ok(entries)
    }

    async fn project_totals(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> Result<EntryTotals, AppError> {
        let state = self.state();
        Ok(totals(state.entries.values().filter(|e| {
            e.project_id == project_id && e.organization_id == organization_id
        })))
    }

    async fn task_total(&self, task_id: Uuid, organization_id: Uuid) -> Result<i64, AppError> {
        let state = self.state();
        Ok(totals(state.entries.values().filter(|e| {
            e.task_id == Some(task_id) && e.organization_id == organization_id
        }))
        .duration)
    }

    async fn organization_totals(&self, organization_id: Uuid) -> Result<EntryTotals, AppError> {
        let state = self.state();
        Ok(totals(
            state
                .entries
                .values()
                .filter(|e| e.organization_id == organization_id),
        ))
    }
}

#[async_trait]
impl InvitationRepository for InMemoryStore {
    async fn insert(&self, invitation: &Invitation) -> Result<Invitation, AppError> {
        let mut state = self.state();
        if state
            .invitations
            .values()
            .any(|i| i.token == invitation.token)
        {
            return Err(AppError::Internal("Duplicate invitation token".to_string()));
        }
        state.invitations.insert(invitation.id, invitation.clone());
        Ok(invitation.clone())
    }

    async fn find(&self, id: Uuid, organization_id: Uuid) -> Result<Option<Invitation>, AppError> {
        Ok(self
            .state()
            .invitations
            .get(&id)
            .filter(|i| i.organization_id == organization_id)
            .cloned())
    }

    async fn find_pending_by_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, AppError> {
        Ok(self
            .state()
            .invitations
            .values()
            .find(|i| {
                i.token == token && i.status == InvitationStatus::Pending && i.expires_at > now
            })
            .cloned())
    }

    async fn find_pending_for_email(
        &self,
        organization_id: Uuid,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>, AppError> {
        Ok(self
            .state()
            .invitations
            .values()
            .filter(|i| {
                i.organization_id == organization_id
                    && i.email == email
                    && i.status == InvitationStatus::Pending
                    && i.expires_at > now
            })
            .max_by_key(|i| i.created_at)
            .cloned())
    }

    async fn save(&self, invitation: &Invitation) -> Result<Invitation, AppError> {
        let mut state = self.state();
        let stored = state
            .invitations
            .get_mut(&invitation.id)
            .filter(|i| i.organization_id == invitation.organization_id)
            .ok_or_else(|| AppError::NotFound("Invitation not found".to_string()))?;
        if stored.status != InvitationStatus::Pending {
            return Err(not_pending(stored));
        }
        *stored = invitation.clone();
        Ok(invitation.clone())
    }

    async fn accept(&self, invitation: &Invitation, user: &User) -> Result<User, AppError> {
        let mut state = self.state();
        let accepted_at = invitation.accepted_at.unwrap_or(invitation.updated_at);

        let still_pending = state.invitations.get(&invitation.id).is_some_and(|i| {
            i.organization_id == invitation.organization_id
                && i.status == InvitationStatus::Pending
                && i.expires_at > accepted_at
        });
        if !still_pending {
            return Err(AppError::InvalidOrExpiredInvitation);
        }
        if let Some(existing) = state.users.values().find(|u| u.email == user.email) {
            return Err(AppError::UserAlreadyExists {
                in_same_organization: existing.organization_id == user.organization_id,
            });
        }

        state.users.insert(user.id, user.clone());
        if let Some(stored) = state.invitations.get_mut(&invitation.id) {
            stored.accept(user.id, accepted_at);
        }
        Ok(user.clone())
    }

    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<InvitationStatus>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Invitation>, AppError> {
        let state = self.state();
        let mut invitations: Vec<Invitation> = state
            .invitations
            .values()
            .filter(|i| {
                i.organization_id == organization_id
                    && status.map_or(true, |s| i.effective_status(now) == s)
            })
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(invitations)
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Invitation>, AppError> {
        let state = self.state();
        let mut expired: Vec<Invitation> = state
            .invitations
            .values()
            .filter(|i| i.status == InvitationStatus::Pending && i.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|i| i.expires_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut state = self.state();
        let mut changed = 0;
        for invitation in state.invitations.values_mut() {
            if invitation.refresh_status(now) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn status_counts(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<InvitationStatusCount>, AppError> {
        let state = self.state();
        let mut counts = Vec::new();
        for status in [
            InvitationStatus::Pending,
            InvitationStatus::Accepted,
            InvitationStatus::Expired,
            InvitationStatus::Cancelled,
        ] {
            let clicks: Vec<i32> = state
                .invitations
                .values()
                .filter(|i| {
                    i.organization_id == organization_id && i.effective_status(now) == status
                })
                .map(|i| i.click_count)
                .collect();
            if clicks.is_empty() {
                continue;
            }
            let total: i64 = clicks.iter().map(|&c| i64::from(c)).sum();
            counts.push(InvitationStatusCount {
                status,
                count: clicks.len() as i64,
                avg_click_count: total as f64 / clicks.len() as f64,
            });
        }
        Ok(counts)
    }
}
