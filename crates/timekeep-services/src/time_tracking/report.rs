use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use timekeep_core::models::{
    hours_2dp, DailyReport, ProjectBreakdown, TeamMemberReport, TeamReport, TimeEntry,
};
use timekeep_core::{Actor, AppError, Clock, Role};
use timekeep_db::TimeEntryRepository;
use uuid::Uuid;

use crate::context::Repositories;

const DEFAULT_TEAM_WINDOW_DAYS: i64 = 7;

/// Read-only summaries over closed time entries.
#[derive(Clone)]
pub struct ReportService {
    entries: Arc<dyn TimeEntryRepository>,
    clock: Arc<dyn Clock>,
}

impl ReportService {
    pub fn new(repositories: &Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: repositories.entries.clone(),
            clock,
        }
    }

    /// The actor's closed entries that started on `date` (UTC). Defaults to today.
    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn daily(
        &self,
        actor: &Actor,
        date: Option<NaiveDate>,
    ) -> Result<DailyReport, AppError> {
        let date = date.unwrap_or_else(|| self.clock.now().date_naive());
        let from = date.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).ok_or_else(|| {
            AppError::InvalidInput(format!("Invalid report date: {}", date))
        })?;
        let to = from + Duration::days(1);

        let entries = self
            .entries
            .closed_between(actor.organization_id, Some(actor.user_id), from, to)
            .await?;
        let total_seconds: i64 = entries.iter().map(|e| e.duration).sum();

        Ok(DailyReport {
            date,
            total_seconds,
            total_hours: hours_2dp(total_seconds),
            entries_count: entries.len() as i64,
            projects: breakdown(&entries),
        })
    }

    /// Per-member and per-project totals for the whole organization. Managers and admins only.
    /// The window defaults to the last seven days.
    #[tracing::instrument(skip(self), fields(organization_id = %actor.organization_id, user_id = %actor.user_id))]
    pub async fn team(
        &self,
        actor: &Actor,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<TeamReport, AppError> {
        if !actor.is_manager_or_admin() {
            return Err(AppError::InsufficientPermission {
                required: Role::Manager,
            });
        }
        let to = to.unwrap_or_else(|| self.clock.now());
        let from = from.unwrap_or(to - Duration::days(DEFAULT_TEAM_WINDOW_DAYS));
        if from >= to {
            return Err(AppError::InvalidTimeRange);
        }

        let entries = self
            .entries
            .closed_between(actor.organization_id, None, from, to)
            .await?;

        let mut members: HashMap<Uuid, TeamMemberReport> = HashMap::new();
        for entry in &entries {
            let member = members
                .entry(entry.user_id)
                .or_insert_with(|| TeamMemberReport {
                    user_id: entry.user_id,
                    total_seconds: 0,
                    total_hours: Decimal::ZERO,
                    total_amount: Decimal::ZERO,
                    entries_count: 0,
                });
            member.total_seconds += entry.duration;
            member.total_amount += entry.total_amount;
            member.entries_count += 1;
        }
        let mut members: Vec<TeamMemberReport> = members
            .into_values()
            .map(|mut m| {
                m.total_hours = hours_2dp(m.total_seconds);
                m
            })
            .collect();
        members.sort_by(|a, b| {
            b.total_seconds
                .cmp(&a.total_seconds)
                .then(a.user_id.cmp(&b.user_id))
        });

        Ok(TeamReport {
            organization_id: actor.organization_id,
            from,
            to,
            total_seconds: entries.iter().map(|e| e.duration).sum(),
            total_amount: entries.iter().map(|e| e.total_amount).sum(),
            members,
            projects: breakdown(&entries),
        })
    }
}

/// Duration and entry count per project, largest first.
fn breakdown(entries: &[TimeEntry]) -> Vec<ProjectBreakdown> {
    let mut projects: HashMap<Uuid, ProjectBreakdown> = HashMap::new();
    for entry in entries {
        let project = projects
            .entry(entry.project_id)
            .or_insert_with(|| ProjectBreakdown {
                project_id: entry.project_id,
                duration: 0,
                entries: 0,
            });
        project.duration += entry.duration;
        project.entries += 1;
    }
    let mut projects: Vec<ProjectBreakdown> = projects.into_values().collect();
    projects.sort_by(|a, b| {
        b.duration
            .cmp(&a.duration)
            .then(a.project_id.cmp(&b.project_id))
    });
    projects
}
