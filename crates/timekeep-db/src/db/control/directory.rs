use async_trait::async_trait;
use sqlx::{PgPool, Postgres};
use timekeep_core::models::{Organization, OrganizationStats, User};
use timekeep_core::AppError;
use uuid::Uuid;

pub(crate) const ORGANIZATION_COLUMNS: &str = "id, name, slug, admin_id, is_active, \
    plan, max_users, max_projects, \
    total_users, active_users, total_projects, total_time_tracked, last_activity, \
    created_at, updated_at";

pub(crate) const USER_COLUMNS: &str = "id, organization_id, email, name, password_hash, role, \
    is_active, hourly_rate, permissions, department, job_title, created_at, updated_at";

/// Organizations and their members.
#[async_trait]
pub trait DirectoryRepository: Send + Sync {
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError>;

    /// User by id, scoped to `organization_id`.
    async fn find_user(&self, id: Uuid, organization_id: Uuid) -> Result<Option<User>, AppError>;

    /// User by email across all organizations. `email` must already be lower-cased.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Live member count, used for seat checks.
    async fn count_users(&self, organization_id: Uuid) -> Result<i64, AppError>;

    async fn count_active_users(&self, organization_id: Uuid) -> Result<i64, AppError>;

    async fn create_user(&self, user: &User) -> Result<User, AppError>;

    async fn save_organization_stats(
        &self,
        organization_id: Uuid,
        stats: &OrganizationStats,
    ) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct PgDirectoryRepository {
    pool: PgPool,
}

impl PgDirectoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Unique violations on `users.email` surface as `UserAlreadyExists`.
pub(crate) fn map_user_insert_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::UserAlreadyExists {
            in_same_organization: false,
        },
        _ => err.into(),
    }
}

pub(crate) async fn insert_user<'e, E>(executor: E, user: &User) -> Result<User, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let query = format!(
        r#"
        INSERT INTO users (
            id, organization_id, email, name, password_hash, role, is_active,
            hourly_rate, permissions, department, job_title, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {}
        "#,
        USER_COLUMNS
    );

    sqlx::query_as::<Postgres, User>(&query)
        .bind(user.id)
        .bind(user.organization_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.is_active)
        .bind(user.hourly_rate)
        .bind(sqlx::types::Json(&user.permissions))
        .bind(&user.department)
        .bind(&user.job_title)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(executor)
        .await
        .map_err(map_user_insert_error)
}

#[async_trait]
impl DirectoryRepository for PgDirectoryRepository {
    #[tracing::instrument(skip(self), fields(db.table = "organizations", db.operation = "select", db.record_id = %id))]
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError> {
        let query = format!("SELECT {} FROM organizations WHERE id = $1", ORGANIZATION_COLUMNS);
        let organization = sqlx::query_as::<Postgres, Organization>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(organization)
    }

    #[tracing::instrument(skip(self), fields(db.table = "users", db.operation = "select", db.record_id = %id))]
    async fn find_user(&self, id: Uuid, organization_id: Uuid) -> Result<Option<User>, AppError> {
        let query = format!(
            "SELECT {} FROM users WHERE id = $1 AND organization_id = $2",
            USER_COLUMNS
        );
        let user = sqlx::query_as::<Postgres, User>(&query)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    #[tracing::instrument(skip(self), fields(db.table = "users", db.operation = "select"))]
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
        let user = sqlx::query_as::<Postgres, User>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    #[tracing::instrument(skip(self), fields(db.table = "users", db.operation = "count"))]
    async fn count_users(&self, organization_id: Uuid) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<Postgres, i64>(
            "SELECT COUNT(*) FROM users WHERE organization_id = $1",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "users", db.operation = "count"))]
    async fn count_active_users(&self, organization_id: Uuid) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<Postgres, i64>(
            "SELECT COUNT(*) FROM users WHERE organization_id = $1 AND is_active",
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[tracing::instrument(skip(self, user), fields(db.table = "users", db.operation = "insert", db.record_id = %user.id))]
    async fn create_user(&self, user: &User) -> Result<User, AppError> {
        insert_user(&self.pool, user).await
    }

    #[tracing::instrument(skip(self, stats), fields(db.table = "organizations", db.operation = "update", db.record_id = %organization_id))]
    async fn save_organization_stats(
        &self,
        organization_id: Uuid,
        stats: &OrganizationStats,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET total_users = $2, active_users = $3, total_projects = $4,
                total_time_tracked = $5, last_activity = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(organization_id)
        .bind(stats.total_users)
        .bind(stats.active_users)
        .bind(stats.total_projects)
        .bind(stats.total_time_tracked)
        .bind(stats.last_activity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
