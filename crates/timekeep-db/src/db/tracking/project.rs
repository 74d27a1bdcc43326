use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use timekeep_core::models::{Project, ProjectStats, Task};
use timekeep_core::AppError;
use uuid::Uuid;

const PROJECT_COLUMNS: &str = "id, organization_id, name, status, manager_id, members, \
    total_tasks, completed_tasks, total_time_tracked, total_earnings, last_activity, \
    created_at, updated_at";

const TASK_COLUMNS: &str = "id, organization_id, project_id, title, assignee_id, created_by, \
    watchers, status, started_at, completed_at, is_active, active_entry_id, last_started, \
    total_tracked, created_at, updated_at";

/// Projects and their tasks, always scoped by organization.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_project(&self, id: Uuid, organization_id: Uuid)
        -> Result<Option<Project>, AppError>;

    /// Earliest created project with status `active`, used when tracking starts without a project.
    async fn oldest_active_project(&self, organization_id: Uuid)
        -> Result<Option<Project>, AppError>;

    async fn count_projects(&self, organization_id: Uuid) -> Result<i64, AppError>;

    /// Task by id, only if it belongs to `project_id` in the organization.
    async fn find_task(
        &self,
        id: Uuid,
        organization_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Task>, AppError>;

    /// Persists status, timestamps and tracking state of a task.
    async fn save_task(&self, task: &Task) -> Result<(), AppError>;

    /// `(total, completed)` task counts for a project.
    async fn task_counts(&self, project_id: Uuid, organization_id: Uuid)
        -> Result<(i64, i64), AppError>;

    async fn save_project_stats(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
        stats: &ProjectStats,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct PgProjectRepository {
    pool: PgPool,
}

impl PgProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepository for PgProjectRepository {
    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "select", db.record_id = %id))]
    async fn find_project(
        &self,
        id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        let query = format!(
            "SELECT {} FROM projects WHERE id = $1 AND organization_id = $2",
            PROJECT_COLUMNS
        );
        let project = sqlx::query_as::<Postgres, Project>(&query)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(project)
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "select"))]
    async fn oldest_active_project(
        &self,
        organization_id: Uuid,
    ) -> Result<Option<Project>, AppError> {
        let query = format!(
            r#"
            SELECT {} FROM projects
            WHERE organization_id = $1 AND status = 'active'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
            PROJECT_COLUMNS
        );
        let project = sqlx::query_as::<Postgres, Project>(&query)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(project)
    }

    #[tracing::instrument(skip(self), fields(db.table = "projects", db.operation = "count"))]
    async fn count_projects(&self, organization_id: Uuid) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<Postgres, i64>(
            "SELECT COUNT(*) FROM projects WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "tasks", db.operation = "select", db.record_id = %id))]
    async fn find_task(
        &self,
        id: Uuid,
        organization_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<Task>, AppError> {
        let query = format!(
            "SELECT {} FROM tasks WHERE id = $1 AND organization_id = $2 AND project_id = $3",
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<Postgres, Task>(&query)
            .bind(id)
            .bind(organization_id)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(task)
    }

    #[tracing::instrument(skip(self, task), fields(db.table = "tasks", db.operation = "update", db.record_id = %task.id))]
    async fn save_task(&self, task: &Task) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = $3, started_at = $4, completed_at = $5, is_active = $6,
                active_entry_id = $7, last_started = $8, total_tracked = $9, updated_at = $10
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(task.id)
        .bind(task.organization_id)
        .bind(task.status)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.time_tracking.is_active)
        .bind(task.time_tracking.active_entry_id)
        .bind(task.time_tracking.last_started)
        .bind(task.time_tracking.total_tracked)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "tasks", db.operation = "aggregate"))]
    async fn task_counts(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> Result<(i64, i64), AppError> {
        let counts = sqlx::query_as::<Postgres, (i64, i64)>(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'completed')
            FROM tasks
            WHERE project_id = $1 AND organization_id = $2
            "#,
        )
        .bind(project_id)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }

    #[tracing::instrument(skip(self, stats), fields(db.table = "projects", db.operation = "update", db.record_id = %project_id))]
    async fn save_project_stats(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
        stats: &ProjectStats,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE projects
            SET total_tasks = $3, completed_tasks = $4, total_time_tracked = $5,
                total_earnings = $6, last_activity = $7, updated_at = NOW()
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(project_id)
        .bind(organization_id)
        .bind(stats.total_tasks)
        .bind(stats.completed_tasks)
        .bind(stats.total_time_tracked)
        .bind(stats.total_earnings)
        .bind(stats.last_activity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
