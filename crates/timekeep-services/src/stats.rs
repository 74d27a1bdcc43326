//! Derived aggregates
//!
//! Project, organization and task totals are recomputed from the source
//! collections after writes. They are informational only and never consulted
//! when enforcing invariants.

use std::sync::Arc;
use timekeep_core::models::{OrganizationStats, ProjectStats, TimeEntry};
use timekeep_core::{AppError, Clock};
use timekeep_db::{DirectoryRepository, ProjectRepository, TimeEntryRepository};
use uuid::Uuid;

use crate::context::Repositories;

#[derive(Clone)]
pub struct StatsService {
    directory: Arc<dyn DirectoryRepository>,
    projects: Arc<dyn ProjectRepository>,
    entries: Arc<dyn TimeEntryRepository>,
    clock: Arc<dyn Clock>,
}

impl StatsService {
    pub fn new(repositories: &Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            directory: repositories.directory.clone(),
            projects: repositories.projects.clone(),
            entries: repositories.entries.clone(),
            clock,
        }
    }

    #[tracing::instrument(skip(self), fields(stats.scope = "project"))]
    pub async fn refresh_project(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> Result<ProjectStats, AppError> {
        let (total_tasks, completed_tasks) =
            self.projects.task_counts(project_id, organization_id).await?;
        let totals = self.entries.project_totals(project_id, organization_id).await?;

        let stats = ProjectStats {
            total_tasks: total_tasks as i32,
            completed_tasks: completed_tasks as i32,
            total_time_tracked: totals.duration,
            total_earnings: totals.amount,
            last_activity: Some(totals.last_activity.unwrap_or_else(|| self.clock.now())),
        };
        self.projects
            .save_project_stats(project_id, organization_id, &stats)
            .await?;

        Ok(stats)
    }

    #[tracing::instrument(skip(self), fields(stats.scope = "organization"))]
    pub async fn refresh_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<OrganizationStats, AppError> {
        let total_users = self.directory.count_users(organization_id).await?;
        let active_users = self.directory.count_active_users(organization_id).await?;
        let total_projects = self.projects.count_projects(organization_id).await?;
        let totals = self.entries.organization_totals(organization_id).await?;

        let stats = OrganizationStats {
            total_users: total_users as i32,
            active_users: active_users as i32,
            total_projects: total_projects as i32,
            total_time_tracked: totals.duration,
            last_activity: Some(self.clock.now()),
        };
        self.directory
            .save_organization_stats(organization_id, &stats)
            .await?;

        Ok(stats)
    }

    /// Recomputes `time_tracking.total_tracked` of a task from its closed entries.
    #[tracing::instrument(skip(self), fields(stats.scope = "task"))]
    pub async fn refresh_task_total(
        &self,
        task_id: Uuid,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<i64>, AppError> {
        let Some(mut task) = self
            .projects
            .find_task(task_id, organization_id, project_id)
            .await?
        else {
            return Ok(None);
        };
        let total = self.entries.task_total(task_id, organization_id).await?;
        task.time_tracking.total_tracked = total;
        self.projects.save_task(&task).await?;

        Ok(Some(total))
    }

    /// Best-effort refresh of everything derived from `entry`. Failures are logged and dropped.
    pub async fn after_entry_change(&self, entry: &TimeEntry) {
        if let Some(task_id) = entry.task_id {
            if let Err(e) = self
                .refresh_task_total(task_id, entry.project_id, entry.organization_id)
                .await
            {
                tracing::warn!(error = %e, task_id = %task_id, "Failed to refresh task total");
            }
        }
        if let Err(e) = self
            .refresh_project(entry.project_id, entry.organization_id)
            .await
        {
            tracing::warn!(
                error = %e,
                project_id = %entry.project_id,
                "Failed to refresh project stats"
            );
        }
        self.after_membership_change(entry.organization_id).await;
    }

    /// Best-effort organization refresh.
    pub async fn after_membership_change(&self, organization_id: Uuid) {
        if let Err(e) = self.refresh_organization(organization_id).await {
            tracing::warn!(
                error = %e,
                organization_id = %organization_id,
                "Failed to refresh organization stats"
            );
        }
    }
}
