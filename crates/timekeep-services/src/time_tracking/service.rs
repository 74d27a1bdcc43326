use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use timekeep_core::models::{
    EntryPage, EntryPatch, EntryQuery, ManualEntryRequest, Project, StartedEntry, Task, TimeEntry,
    DEFAULT_DESCRIPTION,
};
use timekeep_core::{Actor, AppError, Clock, NotificationSink, TrackingEvent};
use timekeep_db::{DirectoryRepository, OpenInsert, ProjectRepository, TimeEntryRepository};
use uuid::Uuid;
use validator::Validate;

use crate::context::Repositories;
use crate::stats::StatsService;

const MAX_DESCRIPTION_LENGTH: usize = 500;
const MAX_PAGE_SIZE: i64 = 100;

/// Start/stop tracking, manual entries, edits and deletion of time entries.
///
/// Every operation runs for an already-authenticated [`Actor`] and only touches
/// records of the actor's organization. A user has at most one open entry per
/// organization; the repository enforces that with a conditional insert, so
/// concurrent starts cannot both succeed.
#[derive(Clone)]
pub struct TimeTrackingService {
    directory: Arc<dyn DirectoryRepository>,
    projects: Arc<dyn ProjectRepository>,
    entries: Arc<dyn TimeEntryRepository>,
    stats: StatsService,
    notifications: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl TimeTrackingService {
    pub fn new(
        repositories: &Repositories,
        notifications: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory: repositories.directory.clone(),
            projects: repositories.projects.clone(),
            entries: repositories.entries.clone(),
            stats: StatsService::new(repositories, clock.clone()),
            notifications,
            clock,
        }
    }

    /// Opens a new entry for the actor. Without `project_id` the organization's oldest
    /// active project is used and `auto_selected` is set.
    #[tracing::instrument(skip(self, description), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn start(
        &self,
        actor: &Actor,
        project_id: Option<Uuid>,
        task_id: Option<Uuid>,
        description: Option<String>,
    ) -> Result<StartedEntry, AppError> {
        let description = normalize_description(description)?;

        let (project, auto_selected) = match project_id {
            Some(id) => (self.project_for(actor, id).await?, false),
            None => {
                let project = self
                    .projects
                    .oldest_active_project(actor.organization_id)
                    .await?
                    .ok_or(AppError::NoActiveProject)?;
                (project, true)
            }
        };
        // The organization default project is open to every member.
        if !auto_selected && !actor.can_track_on_project(project.manager_id, &project.members) {
            tracing::debug!(project_id = %project.id, "Start rejected: no project access");
            return Err(AppError::AccessDenied(
                "Access denied to this project".to_string(),
            ));
        }

        let task = match task_id {
            Some(id) => Some(self.task_for(actor, id, &project).await?),
            None => None,
        };

        let now = self.clock.now();
        let entry = TimeEntry {
            id: Uuid::new_v4(),
            organization_id: actor.organization_id,
            user_id: actor.user_id,
            project_id: project.id,
            task_id: task.as_ref().map(|t| t.id),
            description,
            start_time: now,
            end_time: None,
            duration: 0,
            hourly_rate: self.billing_rate(actor).await?,
            total_amount: Decimal::ZERO,
            is_manual: false,
            billable: true,
            created_at: now,
            updated_at: now,
        };

        let entry = match self.entries.insert_open(&entry).await? {
            OpenInsert::Inserted(entry) => entry,
            OpenInsert::ActiveExists(entry_id) => {
                tracing::debug!(entry_id = %entry_id, "Start rejected: entry already running");
                return Err(AppError::ActiveEntryExists { entry_id });
            }
        };

        if let Some(mut task) = task {
            task.begin_tracking(entry.id, now);
            if let Err(e) = self.projects.save_task(&task).await {
                tracing::warn!(error = %e, task_id = %task.id, "Failed to mark task as tracked");
            }
        }

        tracing::info!(
            entry_id = %entry.id,
            project_id = %entry.project_id,
            auto_selected,
            "Time tracking started"
        );
        self.notifications.publish(TrackingEvent::TimeStarted {
            organization_id: entry.organization_id,
            user_id: entry.user_id,
            entry: entry.clone(),
        });

        Ok(StartedEntry {
            entry,
            auto_selected,
        })
    }

    /// Closes the actor's open entry. A second stop of the same entry fails with
    /// `ActiveEntryNotFound`.
    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn stop(&self, actor: &Actor, entry_id: Uuid) -> Result<TimeEntry, AppError> {
        let mut entry = self
            .entries
            .find_open(entry_id, actor.organization_id, actor.user_id)
            .await?
            .ok_or(AppError::ActiveEntryNotFound)?;

        let now = self.clock.now();
        entry.close(now);
        let entry = self
            .entries
            .close(&entry)
            .await?
            .ok_or(AppError::ActiveEntryNotFound)?;

        if let Some(task_id) = entry.task_id {
            self.release_task(task_id, &entry, now).await;
        }
        self.stats.after_entry_change(&entry).await;

        tracing::info!(
            entry_id = %entry.id,
            duration = entry.duration,
            total_amount = %entry.total_amount,
            "Time tracking stopped"
        );
        self.notifications.publish(TrackingEvent::TimeStopped {
            organization_id: entry.organization_id,
            user_id: entry.user_id,
            entry: entry.clone(),
        });

        Ok(entry)
    }

    /// Records an already finished piece of work.
    #[tracing::instrument(skip(self, request), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn create_manual(
        &self,
        actor: &Actor,
        request: ManualEntryRequest,
    ) -> Result<TimeEntry, AppError> {
        request.validate()?;
        if request.end_time <= request.start_time {
            return Err(AppError::InvalidTimeRange);
        }

        let project = self.project_for(actor, request.project_id).await?;
        if !actor.can_track_on_project(project.manager_id, &project.members) {
            return Err(AppError::AccessDenied(
                "Access denied to this project".to_string(),
            ));
        }
        if let Some(task_id) = request.task_id {
            self.task_for(actor, task_id, &project).await?;
        }

        let now = self.clock.now();
        let mut entry = TimeEntry {
            id: Uuid::new_v4(),
            organization_id: actor.organization_id,
            user_id: actor.user_id,
            project_id: project.id,
            task_id: request.task_id,
            description: normalize_description(request.description)?,
            start_time: request.start_time,
            end_time: Some(request.end_time),
            duration: 0,
            hourly_rate: self.billing_rate(actor).await?,
            total_amount: Decimal::ZERO,
            is_manual: true,
            billable: request.billable,
            created_at: now,
            updated_at: now,
        };
        entry.recompute();

        let entry = self.entries.insert_closed(&entry).await?;
        self.stats.after_entry_change(&entry).await;

        tracing::info!(
            entry_id = %entry.id,
            duration = entry.duration,
            "Manual time entry created"
        );
        self.notifications.publish(TrackingEvent::ManualEntryCreated {
            organization_id: entry.organization_id,
            user_id: entry.user_id,
            entry: entry.clone(),
        });

        Ok(entry)
    }

    /// Updates an entry owned by the actor. The time window of a running entry is fixed.
    #[tracing::instrument(skip(self, patch), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn edit(
        &self,
        actor: &Actor,
        entry_id: Uuid,
        patch: EntryPatch,
    ) -> Result<TimeEntry, AppError> {
        patch.validate()?;
        let mut entry = self
            .entries
            .find_owned(entry_id, actor.organization_id, actor.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Time entry not found".to_string()))?;

        if patch.touches_window() {
            if entry.is_open() {
                return Err(AppError::InvalidState(
                    "Cannot change the time window of a running entry".to_string(),
                ));
            }
            let start = patch.start_time.unwrap_or(entry.start_time);
            let end = patch.end_time.or(entry.end_time).unwrap_or(start);
            if end <= start {
                return Err(AppError::InvalidTimeRange);
            }
            entry.start_time = start;
            entry.end_time = Some(end);
        }
        if patch.description.is_some() {
            entry.description = normalize_description(patch.description)?;
        }
        if let Some(billable) = patch.billable {
            entry.billable = billable;
        }
        entry.recompute();
        entry.updated_at = self.clock.now();

        let entry = self.entries.update(&entry).await?;
        if !entry.is_open() {
            self.stats.after_entry_change(&entry).await;
        }

        tracing::info!(entry_id = %entry.id, "Time entry updated");
        self.notifications.publish(TrackingEvent::TimeEntryUpdated {
            organization_id: entry.organization_id,
            user_id: entry.user_id,
            entry: entry.clone(),
        });

        Ok(entry)
    }

    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn delete(&self, actor: &Actor, entry_id: Uuid) -> Result<(), AppError> {
        let entry = self
            .entries
            .find_owned(entry_id, actor.organization_id, actor.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Time entry not found".to_string()))?;
        if entry.is_open() {
            return Err(AppError::CannotDeleteActiveEntry { entry_id });
        }

        let deleted = self
            .entries
            .delete_closed(entry_id, actor.organization_id, actor.user_id)
            .await?;
        if !deleted {
            return Err(AppError::NotFound("Time entry not found".to_string()));
        }
        self.stats.after_entry_change(&entry).await;

        tracing::info!(entry_id = %entry_id, "Time entry deleted");
        self.notifications.publish(TrackingEvent::TimeEntryDeleted {
            organization_id: actor.organization_id,
            user_id: actor.user_id,
            entry_id,
        });

        Ok(())
    }

    pub async fn active_entry(&self, actor: &Actor) -> Result<Option<TimeEntry>, AppError> {
        self.entries
            .find_open_for_user(actor.organization_id, actor.user_id)
            .await
    }

    /// The actor's own entries, newest first.
    pub async fn list_entries(
        &self,
        actor: &Actor,
        mut query: EntryQuery,
    ) -> Result<EntryPage, AppError> {
        query.page = query.page.max(1);
        query.limit = query.limit.clamp(1, MAX_PAGE_SIZE);

        let entries = self
            .entries
            .list(actor.organization_id, actor.user_id, &query)
            .await?;
        let total = self
            .entries
            .count(actor.organization_id, actor.user_id, &query)
            .await?;

        Ok(EntryPage {
            entries,
            page: query.page,
            limit: query.limit,
            total,
            pages: (total + query.limit - 1) / query.limit,
        })
    }

    async fn project_for(&self, actor: &Actor, project_id: Uuid) -> Result<Project, AppError> {
        self.projects
            .find_project(project_id, actor.organization_id)
            .await?
            .ok_or(AppError::ProjectNotFound)
    }

    async fn task_for(
        &self,
        actor: &Actor,
        task_id: Uuid,
        project: &Project,
    ) -> Result<Task, AppError> {
        let task = self
            .projects
            .find_task(task_id, actor.organization_id, project.id)
            .await?
            .ok_or(AppError::TaskNotFound)?;
        if !actor.can_track_on_task(task.assignee_id, task.created_by, &task.watchers) {
            tracing::debug!(task_id = %task.id, "Rejected: no task access");
            return Err(AppError::AccessDenied("Access denied to this task".to_string()));
        }
        Ok(task)
    }

    async fn billing_rate(&self, actor: &Actor) -> Result<Decimal, AppError> {
        Ok(self
            .directory
            .find_user(actor.user_id, actor.organization_id)
            .await?
            .map(|user| user.billing_rate())
            .unwrap_or(Decimal::ZERO))
    }

    async fn release_task(&self, task_id: Uuid, entry: &TimeEntry, now: DateTime<Utc>) {
        match self
            .projects
            .find_task(task_id, entry.organization_id, entry.project_id)
            .await
        {
            Ok(Some(mut task)) => {
                task.end_tracking(entry.id, entry.duration, now);
                if let Err(e) = self.projects.save_task(&task).await {
                    tracing::warn!(error = %e, task_id = %task_id, "Failed to clear task tracking");
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, task_id = %task_id, "Failed to load task after stop");
            }
        }
    }
}

/// Trims the description and falls back to the default when it is empty.
fn normalize_description(description: Option<String>) -> Result<String, AppError> {
    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());
    if description.chars().count() > MAX_DESCRIPTION_LENGTH {
        return Err(AppError::InvalidInput(format!(
            "Description must be at most {} characters",
            MAX_DESCRIPTION_LENGTH
        )));
    }
    Ok(description)
}
