mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::Harness;
use rstest::rstest;
use uuid::Uuid;
use watchpoint_worker::queue::{QueueName, QueuedJobStatus};
use watchpoint_worker::scheduler::{DispatchOutcome, LockManager};
use watchpoint_worker::store::dao::MemoryStore;

#[tokio::test]
async fn two_schedulers_race_and_exactly_one_dispatches() {
    let store = Arc::new(MemoryStore::new());
    let first = Harness::with_owner(store.clone(), "Agenda", "worker-a");
    let second = Harness::with_owner(store.clone(), "Agenda", "worker-b");
    let resource = first.add_resource();

    let (a, b) = tokio::join!(
        first.dispatcher.dispatch_due(),
        second.dispatcher.dispatch_due()
    );
    let (a, b) = (a.expect("dispatch a"), b.expect("dispatch b"));

    assert_eq!(a.dispatched + b.dispatched, 1);
    assert_eq!(store.jobs(QueueName::Monitor).len(), 1);
    let owner = store.resource(resource.id).expect("resource").locked_by;
    assert!(matches!(owner.as_deref(), Some("worker-a" | "worker-b")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquire_grants_a_single_lock() {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness::with_owner(store.clone(), "Agenda", "worker-a");
    let resource = harness.add_resource();
    let locks = Arc::new(LockManager::new(store.clone(), Duration::from_secs(300)));

    let attempts: Vec<_> = (0..16)
        .map(|i| {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(resource.id, &format!("worker-{i}")).await })
        })
        .collect();
    let mut granted = 0;
    for attempt in attempts {
        if attempt.await.expect("join").expect("acquire") {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
}

#[tokio::test]
async fn loser_skips_the_resource_this_cycle() {
    let store = Arc::new(MemoryStore::new());
    let first = Harness::with_owner(store.clone(), "Agenda", "worker-a");
    let second = Harness::with_owner(store.clone(), "Agenda", "worker-b");
    let resource = first.add_resource();

    let won = first.dispatcher.dispatch_one(resource.id).await.expect("dispatch");
    let lost = second.dispatcher.dispatch_one(resource.id).await.expect("dispatch");

    assert!(matches!(won, DispatchOutcome::Dispatched { .. }));
    assert_eq!(lost, DispatchOutcome::LockHeld);
    // ロック中のリソースは期限内なら選ばれない
    assert_eq!(second.dispatcher.dispatch_due().await.expect("cycle").selected, 0);
}

#[rstest]
#[case::fresh_lock(1, false)]
#[case::stale_lock(10, true)]
#[tokio::test]
async fn stale_locks_are_reclaimed(#[case] locked_minutes_ago: i64, #[case] reclaimable: bool) {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness::with_owner(store.clone(), "Agenda", "worker-b");
    let mut resource = harness.add_resource();
    resource.locked_by = Some("worker-crashed".to_string());
    resource.locked_at = Some(Utc::now() - chrono::Duration::minutes(locked_minutes_ago));
    resource.next_due_at = Utc::now() - chrono::Duration::minutes(30);
    store.insert_resource(resource.clone());

    let report = harness.dispatcher.dispatch_due().await.expect("cycle");

    assert_eq!(report.dispatched == 1, reclaimable);
    let owner = store.resource(resource.id).expect("resource").locked_by;
    let expected = if reclaimable { "worker-b" } else { "worker-crashed" };
    assert_eq!(owner.as_deref(), Some(expected));
}

#[tokio::test]
async fn live_monitor_job_deduplicates_dispatch_and_releases_lock() {
    let store = Arc::new(MemoryStore::new());
    let harness = Harness::with_owner(store.clone(), "Agenda", "worker-a");
    let resource = harness.add_resource();
    harness
        .producer
        .enqueue_monitor(resource.id, "worker-old")
        .await
        .expect("enqueue")
        .expect("job id");

    let outcome = harness.dispatcher.dispatch_one(resource.id).await.expect("dispatch");

    assert_eq!(outcome, DispatchOutcome::AlreadyQueued);
    assert!(store.resource(resource.id).expect("resource").locked_by.is_none());
    assert_eq!(store.jobs(QueueName::Monitor).len(), 1);
}

#[tokio::test]
async fn completed_monitor_job_is_rearmed_on_next_dispatch() {
    let harness = Harness::new("Agenda");
    let resource = harness.add_resource();
    harness.run_check(resource.id).await;
    harness.run_check(resource.id).await;

    let jobs = harness.store.jobs(QueueName::Monitor);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, QueuedJobStatus::Completed);
    assert_eq!(
        harness.store.resource(resource.id).expect("resource").run_count,
        2
    );
}

#[tokio::test]
async fn inactive_and_future_resources_are_not_selected() {
    let harness = Harness::new("Agenda");
    let mut inactive = harness.add_resource();
    inactive.is_active = false;
    harness.store.insert_resource(inactive);
    let mut later = harness.add_resource();
    later.next_due_at = Utc::now() + chrono::Duration::hours(1);
    harness.store.insert_resource(later);

    let report = harness.dispatcher.dispatch_due().await.expect("cycle");

    assert_eq!(report.selected, 0);
    assert!(harness.store.jobs(QueueName::Monitor).is_empty());
}

#[tokio::test]
async fn unknown_resource_cannot_be_locked() {
    let harness = Harness::new("Agenda");
    let outcome = harness
        .dispatcher
        .dispatch_one(Uuid::new_v4())
        .await
        .expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::LockHeld);
}

#[tokio::test]
async fn job_finishing_after_deduplicated_redispatch_still_reschedules() {
    let harness = Harness::new("Agenda");
    let resource = harness.add_resource();
    let first = harness.dispatcher.dispatch_one(resource.id).await.expect("dispatch");
    assert!(matches!(first, DispatchOutcome::Dispatched { .. }));

    // ワーカーが落ちてロックだけが古くなった状態
    let mut stale = harness.store.resource(resource.id).expect("resource");
    stale.locked_at = Some(Utc::now() - chrono::Duration::minutes(10));
    harness.store.insert_resource(stale);
    let second = harness.dispatcher.dispatch_one(resource.id).await.expect("redispatch");
    assert_eq!(second, DispatchOutcome::AlreadyQueued);

    harness.monitor_worker.drain().await.expect("drain");

    let stored = harness.store.resource(resource.id).expect("resource");
    assert_eq!(stored.run_count, 1);
    assert!(stored.next_due_at > Utc::now());
    assert!(stored.last_checked_at.is_some());
    assert!(stored.locked_by.is_none());
}
