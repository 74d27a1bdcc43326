use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Seconds expressed as hours, rounded to two decimal places.
pub fn hours_2dp(seconds: i64) -> Decimal {
    (Decimal::from(seconds) / Decimal::from(3600)).round_dp(2)
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct ProjectBreakdown {
    pub project_id: Uuid,
    pub duration: i64,
    pub entries: i64,
}

/// The caller's closed entries that started on one UTC day.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_seconds: i64,
    pub total_hours: Decimal,
    pub entries_count: i64,
    pub projects: Vec<ProjectBreakdown>,
}

#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct TeamMemberReport {
    pub user_id: Uuid,
    pub total_seconds: i64,
    pub total_hours: Decimal,
    pub total_amount: Decimal,
    pub entries_count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TeamReport {
    pub organization_id: Uuid,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_seconds: i64,
    pub total_amount: Decimal,
    pub members: Vec<TeamMemberReport>,
    pub projects: Vec<ProjectBreakdown>,
}
