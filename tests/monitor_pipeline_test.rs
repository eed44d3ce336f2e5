mod common;

use chrono::Utc;
use common::Harness;
use watchpoint_worker::monitor::{MonitorError, MonitorStatus};
use watchpoint_worker::queue::{QueueName, QueuedJobStatus};
use watchpoint_worker::store::models::RunStatus;

const AGENDA: &str = "Council agenda for March.\n\nItem 1: Budget review.\n\n© 2023 City of Springfield";

#[tokio::test]
async fn first_fetch_stores_snapshot_without_change() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();

    let outcome = harness.monitor.process(resource.id).await.expect("cycle");

    assert_eq!(outcome.status, MonitorStatus::FirstSnapshot);
    assert!(outcome.change_id.is_none());
    assert_eq!(harness.store.snapshots_for(resource.id).len(), 1);
    assert!(harness.store.changes_for(resource.id).is_empty());
}

#[tokio::test]
async fn identical_content_is_no_change_and_adds_no_snapshot() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();

    harness.monitor.process(resource.id).await.expect("first cycle");
    let outcome = harness.monitor.process(resource.id).await.expect("second cycle");

    assert_eq!(outcome.status, MonitorStatus::NoChange);
    assert!(outcome.snapshot_id.is_none());
    assert_eq!(harness.store.snapshots_for(resource.id).len(), 1);
}

#[tokio::test]
async fn appended_paragraph_creates_pending_change() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness.monitor.process(resource.id).await.expect("first cycle");

    let paragraph = "Item 2: Public consultation on the new cycle lanes along Main Street, \
                     open to all residents until the end of April.";
    harness
        .fetcher
        .set_body(&format!("{AGENDA}\n\n{paragraph}"));
    let outcome = harness.monitor.process(resource.id).await.expect("second cycle");

    assert_eq!(outcome.status, MonitorStatus::ChangeDetected);
    let changes = harness.store.changes_for(resource.id);
    assert_eq!(changes.len(), 1);
    let change = &changes[0];
    assert_eq!(Some(change.id), outcome.change_id);
    assert_eq!(change.diff.added().len(), 1);
    assert_eq!(change.diff.total_changes(), 1);
    let first_97: String = paragraph.chars().take(97).collect();
    assert_eq!(
        change.summary,
        format!("New content added: \"{}...\"", first_97.trim_end())
    );
    assert_eq!(harness.store.snapshots_for(resource.id).len(), 2);
}

#[tokio::test]
async fn copyright_year_bump_is_filtered_as_noise() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness.monitor.process(resource.id).await.expect("first cycle");

    harness
        .fetcher
        .set_body(&AGENDA.replace("© 2023", "© 2024"));
    let outcome = harness.monitor.process(resource.id).await.expect("second cycle");

    assert_eq!(outcome.status, MonitorStatus::NoiseFiltered);
    assert!(harness.store.changes_for(resource.id).is_empty());
    // 新しい基準として保存される
    assert_eq!(harness.store.snapshots_for(resource.id).len(), 2);
}

#[tokio::test]
async fn resource_patterns_extend_builtin_noise() {
    let harness = Harness::new("Opening hours: 9-5\n\nVisitors today: 1,204");
    let mut resource = harness.add_resource();
    resource.noise_patterns = vec![r"Visitors today: [\d,]+".to_string()];
    harness.store.insert_resource(resource.clone());
    harness.monitor.process(resource.id).await.expect("first cycle");

    harness
        .fetcher
        .set_body("Opening hours: 9-5\n\nVisitors today: 1,377");
    let outcome = harness.monitor.process(resource.id).await.expect("second cycle");

    assert_eq!(outcome.status, MonitorStatus::NoiseFiltered);
}

#[tokio::test]
async fn fetch_error_counts_failure_and_reschedules_normally() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness.fetcher.fail_with_status(503);

    let before = Utc::now();
    harness.run_check(resource.id).await;

    let stored = harness.store.resource(resource.id).expect("resource");
    assert_eq!(stored.consecutive_errors, 1);
    assert_eq!(stored.last_run_status, Some(RunStatus::Failed));
    assert!(stored.last_error.as_deref().is_some_and(|e| e.contains("503")));
    assert!(stored.locked_by.is_none());
    assert!(stored.next_due_at >= before + resource.check_interval());

    let jobs = harness.store.jobs(QueueName::Monitor);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, QueuedJobStatus::Completed);
}

#[tokio::test]
async fn success_after_errors_resets_error_counter() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness.fetcher.fail_with_status(500);
    harness.run_check(resource.id).await;
    harness.run_check(resource.id).await;
    assert_eq!(
        harness.store.resource(resource.id).expect("resource").consecutive_errors,
        2
    );

    harness.fetcher.set_body(AGENDA);
    harness.run_check(resource.id).await;

    let stored = harness.store.resource(resource.id).expect("resource");
    assert_eq!(stored.consecutive_errors, 0);
    assert_eq!(stored.last_run_status, Some(RunStatus::Success));
    assert_eq!(stored.run_count, 3);
}

#[tokio::test]
async fn storage_failure_keeps_lock_and_returns_storage_error() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness
        .dispatcher
        .dispatch_one(resource.id)
        .await
        .expect("dispatch");
    harness.store.fail_next_captures(1);

    let err = harness.monitor.process(resource.id).await.expect_err("capture fails");

    assert!(matches!(err, MonitorError::Storage(_)));
    let stored = harness.store.resource(resource.id).expect("resource");
    assert_eq!(stored.locked_by.as_deref(), Some("worker-test"));
    assert!(harness.store.snapshots_for(resource.id).is_empty());
}

#[tokio::test]
async fn storage_failure_is_retried_through_the_queue() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness.store.fail_next_captures(1);

    harness.run_check(resource.id).await;

    let job = harness.store.jobs(QueueName::Monitor).pop().expect("job");
    assert_eq!(job.status, QueuedJobStatus::Completed);
    assert_eq!(job.retry_count, 1);
    assert_eq!(harness.fetcher.calls(), 2);

    let stored = harness.store.resource(resource.id).expect("resource");
    assert!(stored.locked_by.is_none());
    assert_eq!(stored.last_run_status, Some(RunStatus::Success));
    assert_eq!(stored.run_count, 1);
    assert_eq!(harness.store.snapshots_for(resource.id).len(), 1);
}

#[tokio::test]
async fn detected_change_queues_notification_job() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness.run_check(resource.id).await;

    harness
        .fetcher
        .set_body(&format!("{AGENDA}\n\nItem 2: Library opening hours extended."));
    harness.run_check(resource.id).await;

    let change = harness.store.changes_for(resource.id).pop().expect("change");
    let notify_jobs = harness.store.jobs(QueueName::Notify);
    assert_eq!(notify_jobs.len(), 1);
    assert_eq!(notify_jobs[0].job_key, format!("change-{}", change.id));
}

#[tokio::test]
async fn missing_resource_fails_job_permanently() {
    let harness = Harness::new(AGENDA);
    let missing = uuid::Uuid::new_v4();
    harness
        .producer
        .enqueue_monitor(missing, "worker-test")
        .await
        .expect("enqueue")
        .expect("job id");

    harness.monitor_worker.drain().await.expect("drain");

    let job = harness.store.jobs(QueueName::Monitor).pop().expect("job");
    assert_eq!(job.status, QueuedJobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(harness.fetcher.calls(), 0);
}

#[tokio::test]
async fn inactive_resource_releases_lock_and_fails_permanently() {
    let harness = Harness::new(AGENDA);
    let resource = harness.add_resource();
    harness
        .dispatcher
        .dispatch_one(resource.id)
        .await
        .expect("dispatch");
    let mut stored = harness.store.resource(resource.id).expect("resource");
    stored.is_active = false;
    harness.store.insert_resource(stored);

    harness.monitor_worker.drain().await.expect("drain");

    let job = harness.store.jobs(QueueName::Monitor).pop().expect("job");
    assert_eq!(job.status, QueuedJobStatus::Failed);
    assert!(harness
        .store
        .resource(resource.id)
        .expect("resource")
        .locked_by
        .is_none());
}
