use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "task_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    InReview,
    Completed,
    Cancelled,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::InReview => write!(f, "in_review"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "in_review" => Ok(TaskStatus::InReview),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// Denormalized tracking state. `active_entry_id` points at the single open entry, if any.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TaskTimeTracking {
    pub is_active: bool,
    pub active_entry_id: Option<Uuid>,
    pub last_started: Option<DateTime<Utc>>,
    pub total_tracked: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Task {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub watchers: Vec<Uuid>,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    pub time_tracking: TaskTimeTracking,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Applies a status change, stamping `started_at` / `completed_at` on the relevant edges.
    pub fn transition_to(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        if self.status == status {
            return;
        }
        if status == TaskStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status == TaskStatus::Completed {
            self.completed_at = Some(now);
        }
        self.status = status;
        self.updated_at = now;
    }

    /// Marks the task as being tracked by `entry_id`. First start moves `todo` to `in_progress`.
    pub fn begin_tracking(&mut self, entry_id: Uuid, now: DateTime<Utc>) {
        if self.status == TaskStatus::Todo {
            self.transition_to(TaskStatus::InProgress, now);
        }
        self.time_tracking.is_active = true;
        self.time_tracking.active_entry_id = Some(entry_id);
        self.time_tracking.last_started = Some(now);
        self.updated_at = now;
    }

    /// Clears tracking state after `entry_id` was stopped and adds its duration.
    pub fn end_tracking(&mut self, entry_id: Uuid, duration: i64, now: DateTime<Utc>) {
        if self.time_tracking.active_entry_id == Some(entry_id) {
            self.time_tracking.is_active = false;
            self.time_tracking.active_entry_id = None;
        }
        self.time_tracking.total_tracked += duration;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            title: "Write docs".to_string(),
            assignee_id: None,
            created_by: Uuid::new_v4(),
            watchers: Vec::new(),
            status,
            started_at: None,
            completed_at: None,
            time_tracking: TaskTimeTracking::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_task_status_from_str() {
        assert_eq!(
            "in_progress".parse::<TaskStatus>().unwrap(),
            TaskStatus::InProgress
        );
        assert_eq!(TaskStatus::InReview.to_string(), "in_review");
        assert!("blocked".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_begin_tracking_advances_todo() {
        let mut t = task(TaskStatus::Todo);
        let entry = Uuid::new_v4();
        let now = Utc::now();
        t.begin_tracking(entry, now);
        assert_eq!(t.status, TaskStatus::InProgress);
        assert_eq!(t.started_at, Some(now));
        assert_eq!(t.time_tracking.active_entry_id, Some(entry));
        assert!(t.time_tracking.is_active);
    }

    #[test]
    fn test_begin_tracking_keeps_review_status() {
        let mut t = task(TaskStatus::InReview);
        t.begin_tracking(Uuid::new_v4(), Utc::now());
        assert_eq!(t.status, TaskStatus::InReview);
        assert!(t.started_at.is_none());
    }

    #[test]
    fn test_end_tracking_accumulates() {
        let mut t = task(TaskStatus::Todo);
        let entry = Uuid::new_v4();
        t.begin_tracking(entry, Utc::now());
        t.end_tracking(entry, 90, Utc::now());
        assert!(!t.time_tracking.is_active);
        assert_eq!(t.time_tracking.active_entry_id, None);
        assert_eq!(t.time_tracking.total_tracked, 90);
    }

    #[test]
    fn test_completed_transition_stamps_completed_at() {
        let mut t = task(TaskStatus::InProgress);
        let now = Utc::now();
        t.transition_to(TaskStatus::Completed, now);
        assert_eq!(t.completed_at, Some(now));
    }
}
