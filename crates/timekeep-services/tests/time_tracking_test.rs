mod helpers;

use chrono::Duration;
use futures::future::join_all;
use helpers::{base_time, seed_organization, seed_project, seed_user, TestContext};
use rust_decimal::Decimal;
use timekeep_core::models::{
    EntryPatch, EntryQuery, ManualEntryRequest, TaskStatus, DEFAULT_DESCRIPTION,
};
use timekeep_core::{AppError, Role};
use uuid::Uuid;

fn manual(project_id: Uuid, minutes_ago: i64, minutes: i64) -> ManualEntryRequest {
    let start = base_time() - Duration::minutes(minutes_ago);
    ManualEntryRequest {
        project_id,
        task_id: None,
        start_time: start,
        end_time: start + Duration::minutes(minutes),
        description: None,
        billable: true,
    }
}

/// A user without projects starts on the organization's oldest active project.
#[tokio::test]
async fn test_start_without_project_auto_selects_oldest_active() {
    let ctx = TestContext::new();

    let started = ctx
        .tracking
        .start(&ctx.outsider, None, None, None)
        .await
        .unwrap();

    assert!(started.auto_selected);
    assert_eq!(started.entry.project_id, ctx.project.id);
    assert_eq!(started.entry.description, DEFAULT_DESCRIPTION);
    assert_eq!(started.entry.start_time, base_time());
    assert!(started.entry.end_time.is_none());
    assert!(started.entry.billable);
    assert!(!started.entry.is_manual);
    assert_eq!(started.entry.hourly_rate, Decimal::ZERO);
    assert_eq!(ctx.sink.kinds(), vec!["time_started"]);
}

#[tokio::test]
async fn test_start_without_any_active_project() {
    let ctx = TestContext::new();
    let empty = seed_organization(&ctx.store, "Empty", 5);
    let lonely = seed_user(&ctx.store, &empty, "lonely@empty.test", Role::Admin, None);

    let err = ctx.tracking.start(&lonely, None, None, None).await.unwrap_err();
    assert!(matches!(err, AppError::NoActiveProject));
}

/// A second start before stopping fails and reports the running entry.
#[tokio::test]
async fn test_second_start_reports_running_entry() {
    let ctx = TestContext::new();

    let first = ctx
        .tracking
        .start(&ctx.member, Some(ctx.project.id), None, None)
        .await
        .unwrap();
    assert!(!first.auto_selected);

    let err = ctx
        .tracking
        .start(&ctx.member, Some(ctx.second_project.id), None, None)
        .await
        .unwrap_err();
    match err {
        AppError::ActiveEntryExists { entry_id } => assert_eq!(entry_id, first.entry.id),
        other => panic!("expected ActiveEntryExists, got {:?}", other),
    }
    assert_eq!(
        ctx.store
            .open_entries(ctx.organization.id, ctx.member.user_id)
            .len(),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_open_exactly_one_entry() {
    let ctx = TestContext::new();

    let attempts = (0..16).map(|_| {
        let tracking = ctx.tracking.clone();
        let actor = ctx.member;
        let project_id = ctx.project.id;
        tokio::spawn(async move { tracking.start(&actor, Some(project_id), None, None).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    let winner_id = winners[0].entry.id;
    for result in &results {
        match result {
            Ok(_) => {}
            Err(AppError::ActiveEntryExists { entry_id }) => assert_eq!(*entry_id, winner_id),
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(
        ctx.store
            .open_entries(ctx.organization.id, ctx.member.user_id)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_start_checks_project_and_task_access() {
    let ctx = TestContext::new();

    let err = ctx
        .tracking
        .start(&ctx.outsider, Some(ctx.project.id), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccessDenied(_)));

    let err = ctx
        .tracking
        .start(&ctx.member, Some(Uuid::new_v4()), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProjectNotFound));

    // Task belongs to the first project only.
    let err = ctx
        .tracking
        .start(&ctx.member, Some(ctx.second_project.id), Some(ctx.task.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::TaskNotFound));

    let bystander = seed_user(
        &ctx.store,
        &ctx.organization,
        "bystander@acme.test",
        Role::User,
        None,
    );
    let mut project = ctx.store.project(ctx.project.id).unwrap();
    project.members.push(bystander.user_id);
    ctx.store.add_project(project);
    let err = ctx
        .tracking
        .start(&bystander, Some(ctx.project.id), Some(ctx.task.id), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AccessDenied(_)));

    assert!(ctx.sink.events().is_empty());
}

#[tokio::test]
async fn test_start_and_stop_update_task_tracking() {
    let ctx = TestContext::new();

    let started = ctx
        .tracking
        .start(
            &ctx.member,
            Some(ctx.project.id),
            Some(ctx.task.id),
            Some("  Hero section  ".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(started.entry.description, "Hero section");
    assert_eq!(started.entry.hourly_rate, Decimal::new(60, 0));

    let task = ctx.store.task(ctx.task.id).unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.started_at, Some(base_time()));
    assert!(task.time_tracking.is_active);
    assert_eq!(task.time_tracking.active_entry_id, Some(started.entry.id));
    assert_eq!(task.time_tracking.last_started, Some(base_time()));

    ctx.advance(Duration::minutes(90));
    let stopped = ctx.tracking.stop(&ctx.member, started.entry.id).await.unwrap();
    assert_eq!(stopped.duration, 5400);
    assert_eq!(stopped.total_amount, Decimal::new(90, 0));

    let task = ctx.store.task(ctx.task.id).unwrap();
    assert!(!task.time_tracking.is_active);
    assert_eq!(task.time_tracking.active_entry_id, None);
    assert_eq!(task.time_tracking.total_tracked, 5400);
    assert_eq!(task.status, TaskStatus::InProgress);

    let project = ctx.store.project(ctx.project.id).unwrap();
    assert_eq!(project.stats.total_time_tracked, 5400);
    assert_eq!(project.stats.total_earnings, Decimal::new(90, 0));
    assert_eq!(project.stats.total_tasks, 1);

    let organization = ctx.store.organization(ctx.organization.id).unwrap();
    assert_eq!(organization.stats.total_users, 4);
    assert_eq!(organization.stats.total_time_tracked, 5400);

    assert_eq!(ctx.sink.kinds(), vec!["time_started", "time_stopped"]);
}

#[tokio::test]
async fn test_stop_twice_fails_the_second_time() {
    let ctx = TestContext::new();
    let started = ctx
        .tracking
        .start(&ctx.member, Some(ctx.project.id), None, None)
        .await
        .unwrap();

    ctx.advance(Duration::minutes(30));
    let stopped = ctx.tracking.stop(&ctx.member, started.entry.id).await.unwrap();
    assert_eq!(stopped.end_time, Some(base_time() + Duration::minutes(30)));

    ctx.advance(Duration::minutes(30));
    let err = ctx
        .tracking
        .stop(&ctx.member, started.entry.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActiveEntryNotFound));

    // The stored entry keeps its first end time.
    let stored = ctx.store.entry(started.entry.id).unwrap();
    assert_eq!(stored.end_time, Some(base_time() + Duration::minutes(30)));
    assert_eq!(stored.duration, 1800);
}

#[tokio::test]
async fn test_stop_someone_elses_entry() {
    let ctx = TestContext::new();
    let started = ctx
        .tracking
        .start(&ctx.member, Some(ctx.project.id), None, None)
        .await
        .unwrap();

    let err = ctx
        .tracking
        .stop(&ctx.manager, started.entry.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActiveEntryNotFound));
    assert!(ctx.store.entry(started.entry.id).unwrap().is_open());
}

#[tokio::test]
async fn test_stop_succeeds_when_stats_refresh_fails() {
    let ctx = TestContext::new();
    let started = ctx
        .tracking
        .start(&ctx.member, Some(ctx.project.id), None, None)
        .await
        .unwrap();
    ctx.store.fail_stats_writes(true);

    ctx.advance(Duration::hours(1));
    let stopped = ctx.tracking.stop(&ctx.member, started.entry.id).await.unwrap();
    assert_eq!(stopped.duration, 3600);
    assert_eq!(
        ctx.store.project(ctx.project.id).unwrap().stats.total_time_tracked,
        0
    );
}

#[tokio::test]
async fn test_manual_entry_formulas() {
    let ctx = TestContext::new();

    let entry = ctx
        .tracking
        .create_manual(&ctx.member, manual(ctx.project.id, 240, 150))
        .await
        .unwrap();
    assert!(entry.is_manual);
    assert_eq!(entry.duration, 9000);
    assert_eq!(entry.hourly_rate, Decimal::new(60, 0));
    assert_eq!(entry.total_amount, Decimal::new(150, 0));
    assert_eq!(entry.description, DEFAULT_DESCRIPTION);
    assert_eq!(ctx.sink.kinds(), vec!["manual_entry_created"]);

    // Not billable still carries the computed amount.
    let mut request = manual(ctx.project.id, 480, 30);
    request.billable = false;
    let entry = ctx.tracking.create_manual(&ctx.member, request).await.unwrap();
    assert!(!entry.billable);
    assert_eq!(entry.total_amount, Decimal::new(30, 0));
}

#[tokio::test]
async fn test_manual_entry_time_range_boundaries() {
    let ctx = TestContext::new();

    let mut equal = manual(ctx.project.id, 60, 0);
    equal.end_time = equal.start_time;
    let err = ctx.tracking.create_manual(&ctx.member, equal).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidTimeRange));

    let mut reversed = manual(ctx.project.id, 60, 0);
    reversed.end_time = reversed.start_time - Duration::seconds(1);
    let err = ctx
        .tracking
        .create_manual(&ctx.member, reversed)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTimeRange));

    let mut one_ms = manual(ctx.project.id, 60, 0);
    one_ms.end_time = one_ms.start_time + Duration::milliseconds(1);
    let entry = ctx.tracking.create_manual(&ctx.member, one_ms).await.unwrap();
    assert_eq!(entry.duration, 0);
    assert_eq!(entry.total_amount, Decimal::ZERO);
}

#[tokio::test]
async fn test_edit_closed_entry_recomputes() {
    let ctx = TestContext::new();
    let entry = ctx
        .tracking
        .create_manual(&ctx.member, manual(ctx.project.id, 120, 60))
        .await
        .unwrap();

    let patch = EntryPatch {
        description: Some("Code review".to_string()),
        billable: Some(false),
        start_time: None,
        end_time: Some(entry.start_time + Duration::minutes(30)),
    };
    let edited = ctx.tracking.edit(&ctx.member, entry.id, patch).await.unwrap();
    assert_eq!(edited.description, "Code review");
    assert!(!edited.billable);
    assert_eq!(edited.duration, 1800);
    assert_eq!(edited.total_amount, Decimal::new(30, 0));

    let backwards = EntryPatch {
        end_time: Some(entry.start_time),
        ..Default::default()
    };
    let err = ctx
        .tracking
        .edit(&ctx.member, entry.id, backwards)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidTimeRange));
}

#[tokio::test]
async fn test_edit_is_owner_only() {
    let ctx = TestContext::new();
    let entry = ctx
        .tracking
        .create_manual(&ctx.member, manual(ctx.project.id, 120, 60))
        .await
        .unwrap();

    let patch = EntryPatch {
        description: Some("Taken over".to_string()),
        ..Default::default()
    };
    let err = ctx.tracking.edit(&ctx.admin, entry.id, patch).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_edit_running_entry_window_is_rejected() {
    let ctx = TestContext::new();
    let started = ctx
        .tracking
        .start(&ctx.member, Some(ctx.project.id), None, None)
        .await
        .unwrap();

    let patch = EntryPatch {
        start_time: Some(base_time() - Duration::hours(1)),
        ..Default::default()
    };
    let err = ctx
        .tracking
        .edit(&ctx.member, started.entry.id, patch)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));

    let patch = EntryPatch {
        description: Some("Renamed".to_string()),
        ..Default::default()
    };
    let edited = ctx
        .tracking
        .edit(&ctx.member, started.entry.id, patch)
        .await
        .unwrap();
    assert_eq!(edited.description, "Renamed");
    assert!(edited.is_open());
}

#[tokio::test]
async fn test_delete_only_closed_entries() {
    let ctx = TestContext::new();
    let started = ctx
        .tracking
        .start(&ctx.member, Some(ctx.project.id), None, None)
        .await
        .unwrap();

    let err = ctx
        .tracking
        .delete(&ctx.member, started.entry.id)
        .await
        .unwrap_err();
    match err {
        AppError::CannotDeleteActiveEntry { entry_id } => assert_eq!(entry_id, started.entry.id),
        other => panic!("expected CannotDeleteActiveEntry, got {:?}", other),
    }

    ctx.advance(Duration::minutes(30));
    ctx.tracking.stop(&ctx.member, started.entry.id).await.unwrap();
    ctx.tracking.delete(&ctx.member, started.entry.id).await.unwrap();
    assert!(ctx.store.entry(started.entry.id).is_none());
    assert_eq!(
        ctx.store.project(ctx.project.id).unwrap().stats.total_time_tracked,
        0
    );

    let err = ctx
        .tracking
        .delete(&ctx.member, started.entry.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_tenant_isolation() {
    let ctx = TestContext::new();
    let other = seed_organization(&ctx.store, "Globex", 5);
    let intruder = seed_user(&ctx.store, &other, "boss@globex.test", Role::Admin, None);
    seed_project(
        &ctx.store,
        &other,
        "Globex internal",
        intruder.user_id,
        Vec::new(),
        base_time() - Duration::days(5),
    );

    let started = ctx
        .tracking
        .start(&ctx.member, Some(ctx.project.id), None, None)
        .await
        .unwrap();

    let err = ctx
        .tracking
        .start(&intruder, Some(ctx.project.id), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ProjectNotFound));

    let err = ctx
        .tracking
        .stop(&intruder, started.entry.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ActiveEntryNotFound));

    // The intruder tracks in their own organization independently.
    let own = ctx.tracking.start(&intruder, None, None, None).await.unwrap();
    assert_eq!(own.entry.organization_id, other.id);
    assert!(ctx
        .tracking
        .active_entry(&intruder)
        .await
        .unwrap()
        .is_some_and(|e| e.id == own.entry.id));

    let page = ctx
        .tracking
        .list_entries(&intruder, EntryQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert!(page.entries.iter().all(|e| e.organization_id == other.id));
}

#[tokio::test]
async fn test_list_entries_paginates_newest_first() {
    let ctx = TestContext::new();
    for hours_ago in 1..=5 {
        ctx.tracking
            .create_manual(&ctx.member, manual(ctx.project.id, hours_ago * 60, 30))
            .await
            .unwrap();
    }
    ctx.tracking
        .create_manual(&ctx.member, manual(ctx.second_project.id, 600, 30))
        .await
        .unwrap();

    let page = ctx
        .tracking
        .list_entries(
            &ctx.member,
            EntryQuery {
                page: 2,
                limit: 4,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 6);
    assert_eq!(page.pages, 2);
    assert_eq!(page.entries.len(), 2);
    assert!(page.entries[0].start_time > page.entries[1].start_time);

    let filtered = ctx
        .tracking
        .list_entries(
            &ctx.member,
            EntryQuery {
                project_id: Some(ctx.second_project.id),
                limit: 1000,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.total, 1);
    assert_eq!(filtered.limit, 100);

    let none = ctx
        .tracking
        .list_entries(&ctx.manager, EntryQuery::default())
        .await
        .unwrap();
    assert_eq!(none.total, 0);
    assert_eq!(none.pages, 0);
}
