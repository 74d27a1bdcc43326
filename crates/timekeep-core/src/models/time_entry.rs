use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_DESCRIPTION: &str = "Working on project";

/// Whole seconds between two instants, rounded down and clamped at zero.
pub fn duration_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds().div_euclid(1000).max(0)
}

/// `duration / 3600 * hourly_rate`.
pub fn billed_amount(duration: i64, hourly_rate: Decimal) -> Decimal {
    Decimal::from(duration) / Decimal::from(3600) * hourly_rate
}

/// A tracked interval of work. `end_time == None` means the entry is still running.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TimeEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub task_id: Option<Uuid>,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds. Zero while the entry is open.
    pub duration: i64,
    pub hourly_rate: Decimal,
    pub total_amount: Decimal,
    pub is_manual: bool,
    pub billable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimeEntry {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Closes the entry at `end` and derives duration and amount.
    pub fn close(&mut self, end: DateTime<Utc>) {
        self.end_time = Some(end);
        self.recompute();
        self.updated_at = end;
    }

    /// Re-derives `duration` and `total_amount` from the time window. No-op while open.
    pub fn recompute(&mut self) {
        if let Some(end) = self.end_time {
            self.duration = duration_seconds(self.start_time, end);
            self.total_amount = billed_amount(self.duration, self.hourly_rate);
        }
    }
}

/// Input for a manual (already closed) entry.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct ManualEntryRequest {
    pub project_id: Uuid,
    pub task_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[serde(default = "default_billable")]
    pub billable: bool,
}

fn default_billable() -> bool {
    true
}

/// Partial update of an entry owned by the caller.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct EntryPatch {
    #[validate(length(max = 500))]
    pub description: Option<String>,
    pub billable: Option<bool>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl EntryPatch {
    pub fn touches_window(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }
}

/// Result of `start`: the new entry and whether the project was picked automatically.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StartedEntry {
    #[serde(flatten)]
    pub entry: TimeEntry,
    pub auto_selected: bool,
}

/// Filters for listing the caller's entries.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryQuery {
    pub project_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: i64,
    pub limit: i64,
}

impl Default for EntryQuery {
    fn default() -> Self {
        Self {
            project_id: None,
            task_id: None,
            from: None,
            to: None,
            page: 1,
            limit: 10,
        }
    }
}

impl EntryQuery {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.limit
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EntryPage {
    pub entries: Vec<TimeEntry>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn open_entry(start: DateTime<Utc>, rate: Decimal) -> TimeEntry {
        TimeEntry {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            task_id: None,
            description: DEFAULT_DESCRIPTION.to_string(),
            start_time: start,
            end_time: None,
            duration: 0,
            hourly_rate: rate,
            total_amount: Decimal::ZERO,
            is_manual: false,
            billable: true,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_duration_rounds_down() {
        let start = Utc::now();
        assert_eq!(duration_seconds(start, start + Duration::milliseconds(1999)), 1);
        assert_eq!(duration_seconds(start, start + Duration::milliseconds(1)), 0);
        assert_eq!(duration_seconds(start, start - Duration::seconds(5)), 0);
    }

    #[test]
    fn test_close_derives_duration_and_amount() {
        let start = Utc::now();
        let rate = Decimal::new(6000, 2);
        let mut entry = open_entry(start, rate);
        entry.close(start + Duration::minutes(90));
        assert!(!entry.is_open());
        assert_eq!(entry.duration, 5400);
        assert_eq!(entry.total_amount, Decimal::from(90));
    }

    #[test]
    fn test_recompute_is_noop_while_open() {
        let mut entry = open_entry(Utc::now(), Decimal::from(50));
        entry.recompute();
        assert_eq!(entry.duration, 0);
        assert_eq!(entry.total_amount, Decimal::ZERO);
    }

    #[test]
    fn test_entry_query_offset() {
        let query = EntryQuery {
            page: 3,
            limit: 20,
            ..Default::default()
        };
        assert_eq!(query.offset(), 40);
        let query = EntryQuery {
            page: 0,
            ..Default::default()
        };
        assert_eq!(query.offset(), 0);
    }
}
