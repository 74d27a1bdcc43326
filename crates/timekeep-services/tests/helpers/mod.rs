#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use timekeep_core::models::{
    Invitation, Organization, OrganizationBilling, OrganizationStats, Permissions, Project,
    ProjectStats, ProjectStatus, Task, TaskStatus, TaskTimeTracking, User,
};
use timekeep_core::{
    Actor, InvitationEmail, InvitationMailer, ManualClock, NotificationSink, Role, TrackingEvent,
};
use timekeep_db::InMemoryStore;
use timekeep_services::{
    InvitationService, InvitationServiceConfig, Repositories, ReportService, StatsService,
    TimeTrackingService,
};
use uuid::Uuid;

pub const FRONTEND_URL: &str = "https://app.timekeep.test";

/// Monday 2026-03-02 09:00 UTC.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// Mailer that records every email and can be switched to fail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<InvitationEmail>>,
    failure: Mutex<Option<String>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<InvitationEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_with(&self, error: Option<&str>) {
        *self.failure.lock().unwrap() = error.map(str::to_string);
    }
}

#[async_trait]
impl InvitationMailer for RecordingMailer {
    async fn send_invitation(&self, email: InvitationEmail) -> Result<(), String> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TrackingEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<TrackingEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind()).collect()
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, event: TrackingEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// One seeded organization with an admin, a manager, a project member and a
/// user without projects, plus services wired to an in-memory store.
pub struct TestContext {
    pub store: InMemoryStore,
    pub clock: ManualClock,
    pub mailer: Arc<RecordingMailer>,
    pub sink: Arc<RecordingSink>,
    pub tracking: TimeTrackingService,
    pub invitations: InvitationService,
    pub reports: ReportService,
    pub stats: StatsService,
    pub organization: Organization,
    pub admin: Actor,
    pub manager: Actor,
    pub member: Actor,
    pub outsider: Actor,
    /// Oldest active project; `member` belongs to it.
    pub project: Project,
    /// Second active project; `member` belongs to it too.
    pub second_project: Project,
    /// Todo task on `project`, assigned to `member`.
    pub task: Task,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_max_users(10)
    }

    pub fn with_max_users(max_users: i32) -> Self {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(base_time());
        let mailer = Arc::new(RecordingMailer::default());
        let sink = Arc::new(RecordingSink::default());

        let organization = seed_organization(&store, "Acme", max_users);
        let admin = seed_user(&store, &organization, "admin@acme.test", Role::Admin, None);
        let manager = seed_user(
            &store,
            &organization,
            "manager@acme.test",
            Role::Manager,
            Some(Decimal::new(80, 0)),
        );
        let member = seed_user(
            &store,
            &organization,
            "member@acme.test",
            Role::User,
            Some(Decimal::new(60, 0)),
        );
        let outsider = seed_user(&store, &organization, "outsider@acme.test", Role::User, None);

        let project = seed_project(
            &store,
            &organization,
            "Website",
            manager.user_id,
            vec![member.user_id],
            base_time() - Duration::days(30),
        );
        let second_project = seed_project(
            &store,
            &organization,
            "Mobile app",
            manager.user_id,
            vec![member.user_id],
            base_time() - Duration::days(10),
        );
        let task = seed_task(&store, &project, member.user_id, manager.user_id);

        let repositories = Repositories::in_memory(store.clone());
        let shared_clock: Arc<ManualClock> = Arc::new(clock.clone());
        let tracking = TimeTrackingService::new(&repositories, sink.clone(), shared_clock.clone());
        let invitations = InvitationService::new(
            &repositories,
            mailer.clone(),
            sink.clone(),
            shared_clock.clone(),
            InvitationServiceConfig {
                frontend_url: FRONTEND_URL.to_string(),
                ..Default::default()
            },
        );
        let reports = ReportService::new(&repositories, shared_clock.clone());
        let stats = StatsService::new(&repositories, shared_clock);

        Self {
            store,
            clock,
            mailer,
            sink,
            tracking,
            invitations,
            reports,
            stats,
            organization,
            admin,
            manager,
            member,
            outsider,
            project,
            second_project,
            task,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Stored token of an invitation (tokens are never serialized).
    pub fn token_of(&self, invitation_id: Uuid) -> String {
        self.store
            .invitation(invitation_id)
            .expect("invitation stored")
            .token
    }
}

pub fn seed_organization(store: &InMemoryStore, name: &str, max_users: i32) -> Organization {
    let organization = Organization {
        id: Uuid::new_v4(),
        name: name.to_string(),
        slug: name.to_lowercase().replace(' ', "-"),
        admin_id: Uuid::new_v4(),
        is_active: true,
        billing: OrganizationBilling {
            plan: "team".to_string(),
            max_users,
            max_projects: 10,
        },
        stats: OrganizationStats::default(),
        created_at: base_time() - Duration::days(90),
        updated_at: base_time() - Duration::days(90),
    };
    store.add_organization(organization.clone());
    organization
}

pub fn seed_user(
    store: &InMemoryStore,
    organization: &Organization,
    email: &str,
    role: Role,
    hourly_rate: Option<Decimal>,
) -> Actor {
    let user = User {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        email: email.to_string(),
        name: email.split('@').next().unwrap_or(email).to_string(),
        password_hash: "$argon2id$test".to_string(),
        role,
        is_active: true,
        hourly_rate,
        permissions: Permissions::for_role(role),
        department: None,
        job_title: None,
        created_at: base_time() - Duration::days(60),
        updated_at: base_time() - Duration::days(60),
    };
    store.add_user(user.clone());
    Actor::new(user.id, organization.id, role)
}

pub fn seed_project(
    store: &InMemoryStore,
    organization: &Organization,
    name: &str,
    manager_id: Uuid,
    members: Vec<Uuid>,
    created_at: DateTime<Utc>,
) -> Project {
    let project = Project {
        id: Uuid::new_v4(),
        organization_id: organization.id,
        name: name.to_string(),
        status: ProjectStatus::Active,
        manager_id,
        members,
        stats: ProjectStats::default(),
        created_at,
        updated_at: created_at,
    };
    store.add_project(project.clone());
    project
}

pub fn seed_task(
    store: &InMemoryStore,
    project: &Project,
    assignee: Uuid,
    created_by: Uuid,
) -> Task {
    let task = Task {
        id: Uuid::new_v4(),
        organization_id: project.organization_id,
        project_id: project.id,
        title: "Landing page".to_string(),
        assignee_id: Some(assignee),
        created_by,
        watchers: Vec::new(),
        status: TaskStatus::Todo,
        started_at: None,
        completed_at: None,
        time_tracking: TaskTimeTracking::default(),
        created_at: project.created_at,
        updated_at: project.created_at,
    };
    store.add_task(task.clone());
    task
}

/// Overwrites the stored expiry of an invitation.
pub fn set_expiry(store: &InMemoryStore, invitation: &Invitation, expires_at: DateTime<Utc>) {
    let mut invitation = store.invitation(invitation.id).expect("invitation stored");
    invitation.expires_at = expires_at;
    store.add_invitation(invitation);
}
