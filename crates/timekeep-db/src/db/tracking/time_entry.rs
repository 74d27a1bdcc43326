use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres};
use timekeep_core::models::{EntryQuery, TimeEntry};
use timekeep_core::AppError;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "id, organization_id, user_id, project_id, task_id, description, \
    start_time, end_time, duration, hourly_rate, total_amount, is_manual, billable, \
    created_at, updated_at";

const ENTRY_FILTER: &str = "organization_id = $1 AND user_id = $2 \
    AND ($3::uuid IS NULL OR project_id = $3) \
    AND ($4::uuid IS NULL OR task_id = $4) \
    AND ($5::timestamptz IS NULL OR start_time >= $5) \
    AND ($6::timestamptz IS NULL OR start_time <= $6)";

/// Outcome of the conditional insert of an open entry.
#[derive(Debug, Clone)]
pub enum OpenInsert {
    Inserted(TimeEntry),
    /// The user already has this open entry; nothing was written.
    ActiveExists(Uuid),
}

/// Sums over closed entries.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct EntryTotals {
    pub duration: i64,
    pub amount: Decimal,
    pub last_activity: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait TimeEntryRepository: Send + Sync {
    /// Inserts an open entry unless the user already has one in the organization.
    /// The check and the write are a single atomic step.
    async fn insert_open(&self, entry: &TimeEntry) -> Result<OpenInsert, AppError>;

    async fn insert_closed(&self, entry: &TimeEntry) -> Result<TimeEntry, AppError>;

    async fn find_open_for_user(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError>;

    async fn find_open(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError>;

    async fn find_owned(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError>;

    /// Writes `end_time`, `duration` and `total_amount` only if the stored entry is still
    /// open. `None` means another caller closed it first.
    async fn close(&self, entry: &TimeEntry) -> Result<Option<TimeEntry>, AppError>;

    async fn update(&self, entry: &TimeEntry) -> Result<TimeEntry, AppError>;

    /// Deletes a closed entry owned by `user_id`. Returns false if nothing matched.
    async fn delete_closed(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError>;

    /// One page of the user's entries, newest first.
    async fn list(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        query: &EntryQuery,
    ) -> Result<Vec<TimeEntry>, AppError>;

    async fn count(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        query: &EntryQuery,
    ) -> Result<i64, AppError>;

    /// Closed entries that started in `[from, to)`, optionally for one user.
    async fn closed_between(
        &self,
        organization_id: Uuid,
        user_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, AppError>;

    async fn project_totals(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> Result<EntryTotals, AppError>;

    async fn task_total(&self, task_id: Uuid, organization_id: Uuid) -> Result<i64, AppError>;

    async fn organization_totals(&self, organization_id: Uuid) -> Result<EntryTotals, AppError>;
}

#[derive(Clone)]
pub struct PgTimeEntryRepository {
    pool: PgPool,
}

impl PgTimeEntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(
        &self,
        entry: &TimeEntry,
        on_conflict: &str,
    ) -> Result<Option<TimeEntry>, AppError> {
        let query = format!(
            r#"
            INSERT INTO time_entries (
                id, organization_id, user_id, project_id, task_id, description, start_time,
                end_time, duration, hourly_rate, total_amount, is_manual, billable,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            {}
            RETURNING {}
            "#,
            on_conflict, ENTRY_COLUMNS
        );

        let inserted = sqlx::query_as::<Postgres, TimeEntry>(&query)
            .bind(entry.id)
            .bind(entry.organization_id)
            .bind(entry.user_id)
            .bind(entry.project_id)
            .bind(entry.task_id)
            .bind(&entry.description)
            .bind(entry.start_time)
            .bind(entry.end_time)
            .bind(entry.duration)
            .bind(entry.hourly_rate)
            .bind(entry.total_amount)
            .bind(entry.is_manual)
            .bind(entry.billable)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(inserted)
    }

    async fn find_one(
        &self,
        condition: &str,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError> {
        let query = format!(
            "SELECT {} FROM time_entries WHERE id = $1 AND organization_id = $2 AND user_id = $3 {}",
            ENTRY_COLUMNS, condition
        );
        let entry = sqlx::query_as::<Postgres, TimeEntry>(&query)
            .bind(id)
            .bind(organization_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }
}

#[async_trait]
impl TimeEntryRepository for PgTimeEntryRepository {
    #[tracing::instrument(skip(self, entry), fields(db.table = "time_entries", db.operation = "insert", db.record_id = %entry.id))]
    async fn insert_open(&self, entry: &TimeEntry) -> Result<OpenInsert, AppError> {
        // The conflicting entry can be stopped between the insert and the lookup,
        // in which case the insert is tried once more.
        for _ in 0..2 {
            let inserted = self
                .insert(
                    entry,
                    "ON CONFLICT (organization_id, user_id) WHERE end_time IS NULL DO NOTHING",
                )
                .await?;
            if let Some(inserted) = inserted {
                return Ok(OpenInsert::Inserted(inserted));
            }
            if let Some(existing) = self
                .find_open_for_user(entry.organization_id, entry.user_id)
                .await?
            {
                return Ok(OpenInsert::ActiveExists(existing.id));
            }
        }

        Err(AppError::Internal(
            "Open time entry insert kept conflicting".to_string(),
        ))
    }

    #[tracing::instrument(skip(self, entry), fields(db.table = "time_entries", db.operation = "insert", db.record_id = %entry.id))]
    async fn insert_closed(&self, entry: &TimeEntry) -> Result<TimeEntry, AppError> {
        self.insert(entry, "")
            .await?
            .ok_or_else(|| AppError::Internal("Time entry insert returned no row".to_string()))
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "select"))]
    async fn find_open_for_user(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError> {
        let query = format!(
            "SELECT {} FROM time_entries WHERE organization_id = $1 AND user_id = $2 AND end_time IS NULL",
            ENTRY_COLUMNS
        );
        let entry = sqlx::query_as::<Postgres, TimeEntry>(&query)
            .bind(organization_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "select", db.record_id = %id))]
    async fn find_open(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError> {
        self.find_one("AND end_time IS NULL", id, organization_id, user_id)
            .await
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "select", db.record_id = %id))]
    async fn find_owned(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TimeEntry>, AppError> {
        self.find_one("", id, organization_id, user_id).await
    }

    #[tracing::instrument(skip(self, entry), fields(db.table = "time_entries", db.operation = "update", db.record_id = %entry.id))]
    async fn close(&self, entry: &TimeEntry) -> Result<Option<TimeEntry>, AppError> {
        let query = format!(
            r#"
            UPDATE time_entries
            SET end_time = $4, duration = $5, total_amount = $6, updated_at = $7
            WHERE id = $1 AND organization_id = $2 AND user_id = $3 AND end_time IS NULL
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );
        let closed = sqlx::query_as::<Postgres, TimeEntry>(&query)
            .bind(entry.id)
            .bind(entry.organization_id)
            .bind(entry.user_id)
            .bind(entry.end_time)
            .bind(entry.duration)
            .bind(entry.total_amount)
            .bind(entry.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        Ok(closed)
    }

    #[tracing::instrument(skip(self, entry), fields(db.table = "time_entries", db.operation = "update", db.record_id = %entry.id))]
    async fn update(&self, entry: &TimeEntry) -> Result<TimeEntry, AppError> {
        let query = format!(
            r#"
            UPDATE time_entries
            SET description = $4, billable = $5, start_time = $6, end_time = $7,
                duration = $8, total_amount = $9, updated_at = $10
            WHERE id = $1 AND organization_id = $2 AND user_id = $3
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );
        let updated = sqlx::query_as::<Postgres, TimeEntry>(&query)
            .bind(entry.id)
            .bind(entry.organization_id)
            .bind(entry.user_id)
            .bind(&entry.description)
            .bind(entry.billable)
            .bind(entry.start_time)
            .bind(entry.end_time)
            .bind(entry.duration)
            .bind(entry.total_amount)
            .bind(entry.updated_at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Time entry not found".to_string()))?;

        Ok(updated)
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "delete", db.record_id = %id))]
    async fn delete_closed(
        &self,
        id: Uuid,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM time_entries
            WHERE id = $1 AND organization_id = $2 AND user_id = $3 AND end_time IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(organization_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self, query), fields(db.table = "time_entries", db.operation = "select"))]
    async fn list(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        query: &EntryQuery,
    ) -> Result<Vec<TimeEntry>, AppError> {
        let sql = format!(
            "SELECT {} FROM time_entries WHERE {} ORDER BY start_time DESC, id DESC LIMIT $7 OFFSET $8",
            ENTRY_COLUMNS, ENTRY_FILTER
        );
        let entries = sqlx::query_as::<Postgres, TimeEntry>(&sql)
            .bind(organization_id)
            .bind(user_id)
            .bind(query.project_id)
            .bind(query.task_id)
            .bind(query.from)
            .bind(query.to)
            .bind(query.limit)
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    #[tracing::instrument(skip(self, query), fields(db.table = "time_entries", db.operation = "count"))]
    async fn count(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        query: &EntryQuery,
    ) -> Result<i64, AppError> {
        let sql = format!("SELECT COUNT(*) FROM time_entries WHERE {}", ENTRY_FILTER);
        let count = sqlx::query_scalar::<Postgres, i64>(&sql)
            .bind(organization_id)
            .bind(user_id)
            .bind(query.project_id)
            .bind(query.task_id)
            .bind(query.from)
            .bind(query.to)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "select"))]
    async fn closed_between(
        &self,
        organization_id: Uuid,
        user_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, AppError> {
        let query = format!(
            r#"
            SELECT {} FROM time_entries
            WHERE organization_id = $1 AND ($2::uuid IS NULL OR user_id = $2)
              AND start_time >= $3 AND start_time < $4 AND end_time IS NOT NULL
            ORDER BY start_time ASC
            "#,
            ENTRY_COLUMNS
        );
        let entries = sqlx::query_as::<Postgres, TimeEntry>(&query)
            .bind(organization_id)
            .bind(user_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        Ok(entries)
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "aggregate"))]
    async fn project_totals(
        &self,
        project_id: Uuid,
        organization_id: Uuid,
    ) -> Result<EntryTotals, AppError> {
        let totals = sqlx::query_as::<Postgres, EntryTotals>(
            r#"
            SELECT COALESCE(SUM(duration), 0)::bigint AS duration,
                   COALESCE(SUM(total_amount), 0) AS amount,
                   MAX(end_time) AS last_activity
            FROM time_entries
            WHERE project_id = $1 AND organization_id = $2 AND end_time IS NOT NULL
            "#,
        )
        .bind(project_id)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "aggregate"))]
    async fn task_total(&self, task_id: Uuid, organization_id: Uuid) -> Result<i64, AppError> {
        let total = sqlx::query_scalar::<Postgres, i64>(
            r#"
            SELECT COALESCE(SUM(duration), 0)::bigint
            FROM time_entries
            WHERE task_id = $1 AND organization_id = $2 AND end_time IS NOT NULL
            "#,
        )
        .bind(task_id)
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    #[tracing::instrument(skip(self), fields(db.table = "time_entries", db.operation = "aggregate"))]
    async fn organization_totals(&self, organization_id: Uuid) -> Result<EntryTotals, AppError> {
        let totals = sqlx::query_as::<Postgres, EntryTotals>(
            r#"
            SELECT COALESCE(SUM(duration), 0)::bigint AS duration,
                   COALESCE(SUM(total_amount), 0) AS amount,
                   MAX(end_time) AS last_activity
            FROM time_entries
            WHERE organization_id = $1 AND end_time IS NOT NULL
            "#,
        )
        .bind(organization_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }
}
