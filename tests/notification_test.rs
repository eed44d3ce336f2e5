mod common;

use chrono::Utc;
use common::Harness;
use uuid::Uuid;
use watchpoint_worker::diff::diff;
use watchpoint_worker::notify::{REASON_ALREADY_RECORDED, REASON_ALREADY_SENT, REASON_IN_PROGRESS};
use watchpoint_worker::queue::{QueueName, QueuedJobStatus};
use watchpoint_worker::severity::Severity;
use watchpoint_worker::store::dao::{ChangeDao, NotificationDao};
use watchpoint_worker::store::models::{
    Change, DeliveryStatus, MonitoredResource, NotificationRecord, NotificationStatus, Subscriber,
};

fn pending_change(resource: &MonitoredResource) -> Change {
    let set = diff(
        "Tender 2024/17 for street lighting.",
        "Tender 2024/17 for street lighting.\n\nDeadline extended to 30 May.",
    );
    Change {
        id: Uuid::new_v4(),
        resource_id: resource.id,
        snapshot_before_id: Uuid::new_v4(),
        snapshot_after_id: Uuid::new_v4(),
        summary: watchpoint_worker::summary::summarize(&set),
        severity: Severity::classify(&set),
        diff: set,
        delivery_status: DeliveryStatus::Pending,
        notified_at: None,
        detected_at: Utc::now(),
    }
}

fn seeded() -> (Harness, MonitoredResource, Change) {
    let harness = Harness::new("unused");
    let resource = harness.add_resource();
    let change = pending_change(&resource);
    harness.store.insert_change(change.clone());
    (harness, resource, change)
}

async fn sent_records(harness: &Harness, change_id: Uuid) -> Vec<NotificationRecord> {
    harness
        .store
        .records_for_change(change_id)
        .await
        .expect("records")
        .into_iter()
        .filter(|record| record.status == NotificationStatus::Sent)
        .collect()
}

#[tokio::test]
async fn delivery_sends_once_and_marks_change_sent() {
    let (harness, resource, change) = seeded();

    let outcome = harness.notifier.deliver(change.id).await.expect("deliver");

    assert!(outcome.success);
    assert_eq!(outcome.reason, None);
    let sent = harness.channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "https://hooks.example.org/watch");
    assert_eq!(sent[0].1.resource_id, resource.id);
    assert!(sent[0].1.subject.contains("Council agenda"));

    let stored = harness.store.change(change.id).expect("change");
    assert_eq!(stored.delivery_status, DeliveryStatus::Sent);
    assert!(stored.notified_at.is_some());
    assert_eq!(sent_records(&harness, change.id).await.len(), 1);
}

#[tokio::test]
async fn repeated_delivery_is_effectively_exactly_once() {
    let (harness, _, change) = seeded();

    harness.notifier.deliver(change.id).await.expect("first");
    for _ in 0..4 {
        let outcome = harness.notifier.deliver(change.id).await.expect("repeat");
        assert!(outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some(REASON_ALREADY_SENT));
    }

    assert_eq!(harness.channel.sent_for(change.id), 1);
    assert_eq!(sent_records(&harness, change.id).await.len(), 1);
}

#[tokio::test]
async fn crash_before_flag_update_is_repaired_from_the_log() {
    let (harness, _, change) = seeded();
    let subscriber = Subscriber {
        id: Uuid::new_v4(),
        channel: "webhook".to_string(),
        email: None,
        webhook_url: Some("https://hooks.example.org/watch".to_string()),
    };
    // 送信と記録は済んだがフラグ更新前に落ちた状態
    harness
        .store
        .insert_record(&NotificationRecord::sent(
            change.id,
            &subscriber,
            "https://hooks.example.org/watch",
            Utc::now(),
        ))
        .await
        .expect("record");

    let outcome = harness.notifier.deliver(change.id).await.expect("deliver");

    assert!(outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some(REASON_ALREADY_RECORDED));
    assert_eq!(harness.channel.sent_for(change.id), 0);
    assert_eq!(
        harness.store.change(change.id).expect("change").delivery_status,
        DeliveryStatus::Sent
    );
    assert_eq!(sent_records(&harness, change.id).await.len(), 1);
}

#[tokio::test]
async fn channel_failure_is_recorded_and_change_stays_pending() {
    let (harness, _, change) = seeded();
    harness.channel.set_failing(true);

    let outcome = harness.notifier.deliver(change.id).await.expect("deliver");

    assert!(!outcome.success);
    assert!(outcome
        .reason
        .as_deref()
        .is_some_and(|reason| reason.contains("relay refused")));
    let records = harness.store.records_for_change(change.id).await.expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, NotificationStatus::Failed);
    assert_eq!(
        harness.store.change(change.id).expect("change").delivery_status,
        DeliveryStatus::Pending
    );

    // 失敗後は再び配信できる
    harness.channel.set_failing(false);
    let outcome = harness.notifier.deliver(change.id).await.expect("redeliver");
    assert!(outcome.success);
    assert_eq!(harness.channel.sent_for(change.id), 1);
}

#[tokio::test]
async fn unconfigured_channel_records_failure() {
    let (harness, resource, change) = seeded();
    harness.store.insert_subscriber(Subscriber {
        id: resource.subscriber_id,
        channel: "email".to_string(),
        email: Some("clerk@example.org".to_string()),
        webhook_url: None,
    });

    let outcome = harness.notifier.deliver(change.id).await.expect("deliver");

    assert!(!outcome.success);
    assert!(outcome.reason.as_deref().is_some_and(|r| r.contains("email")));
    let records = harness.store.records_for_change(change.id).await.expect("records");
    assert_eq!(records[0].status, NotificationStatus::Failed);
    assert!(harness.channel.sent().is_empty());
}

#[tokio::test]
async fn lost_claim_reports_delivery_in_progress() {
    let (harness, _, change) = seeded();
    let now = Utc::now();
    assert!(harness
        .store
        .try_claim_delivery(change.id, "worker-other:1", now, now - chrono::Duration::minutes(2))
        .await
        .expect("claim"));

    let outcome = harness.notifier.deliver(change.id).await.expect("deliver");

    assert!(!outcome.success);
    assert_eq!(outcome.reason.as_deref(), Some(REASON_IN_PROGRESS));
    assert!(harness.channel.sent().is_empty());
}

#[tokio::test]
async fn stale_claim_is_taken_over() {
    let (harness, _, change) = seeded();
    let long_ago = Utc::now() - chrono::Duration::minutes(30);
    harness
        .store
        .try_claim_delivery(change.id, "worker-dead:1", long_ago, long_ago)
        .await
        .expect("claim");

    let outcome = harness.notifier.deliver(change.id).await.expect("deliver");

    assert!(outcome.success);
    assert_eq!(harness.channel.sent_for(change.id), 1);
}

#[tokio::test]
async fn concurrent_deliveries_send_once() {
    let (harness, _, change) = seeded();

    let (a, b, c) = tokio::join!(
        harness.notifier.deliver(change.id),
        harness.notifier.deliver(change.id),
        harness.notifier.deliver(change.id),
    );
    for outcome in [a, b, c] {
        outcome.expect("deliver");
    }

    assert_eq!(harness.channel.sent_for(change.id), 1);
    assert_eq!(sent_records(&harness, change.id).await.len(), 1);
}

#[tokio::test]
async fn missing_change_fails_notify_job_permanently() {
    let (harness, _, change) = seeded();
    harness
        .producer
        .enqueue_change_notification(change.id)
        .await
        .expect("enqueue");
    harness.store.remove_change(change.id);

    harness.notify_worker.drain().await.expect("drain");

    let job = harness.store.jobs(QueueName::Notify).pop().expect("job");
    assert_eq!(job.status, QueuedJobStatus::Failed);
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn failed_delivery_still_completes_the_job() {
    let (harness, _, change) = seeded();
    harness.channel.set_failing(true);
    harness
        .producer
        .enqueue_change_notification(change.id)
        .await
        .expect("enqueue");

    harness.notify_worker.drain().await.expect("drain");

    let job = harness.store.jobs(QueueName::Notify).pop().expect("job");
    assert_eq!(job.status, QueuedJobStatus::Completed);
}

#[tokio::test]
async fn backfill_requeues_pending_and_skips_sent() {
    let (harness, resource, delivered) = seeded();
    harness.notifier.deliver(delivered.id).await.expect("deliver");
    let pending = pending_change(&resource);
    harness.store.insert_change(pending.clone());

    let report = harness.backfill.reconcile().await.expect("reconcile");

    assert_eq!(report.scanned, 1);
    assert_eq!(report.enqueued, 1);
    let keys: Vec<String> = harness
        .store
        .jobs(QueueName::Notify)
        .into_iter()
        .map(|job| job.job_key)
        .collect();
    assert_eq!(keys, vec![format!("backfill-{}", pending.id)]);

    // 同じジョブが生きている間は再投入しない
    let again = harness.backfill.reconcile().await.expect("reconcile again");
    assert_eq!(again.enqueued, 0);
    assert_eq!(again.skipped, 1);

    harness.notify_worker.drain().await.expect("drain");
    assert_eq!(harness.channel.sent_for(pending.id), 1);
    assert_eq!(harness.backfill.reconcile().await.expect("final").scanned, 0);
}

#[tokio::test]
async fn backfill_never_requeues_change_with_sent_record() {
    let (harness, _, change) = seeded();
    let subscriber = Subscriber {
        id: Uuid::new_v4(),
        channel: "webhook".to_string(),
        email: None,
        webhook_url: Some("https://hooks.example.org/watch".to_string()),
    };
    harness
        .store
        .insert_record(&NotificationRecord::sent(
            change.id,
            &subscriber,
            "https://hooks.example.org/watch",
            Utc::now(),
        ))
        .await
        .expect("record");

    let report = harness.backfill.reconcile().await.expect("reconcile");

    assert_eq!(report.scanned, 1);
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.skipped, 1);
    assert!(harness.store.jobs(QueueName::Notify).is_empty());
}

#[tokio::test]
async fn end_to_end_change_is_delivered_once() {
    let harness = Harness::new("Notice board.\n\nOpening hours: 9-5");
    let resource = harness.add_resource();
    harness.run_check(resource.id).await;
    harness
        .fetcher
        .set_body("Notice board.\n\nOpening hours: 9-5\n\nThe pool closes for repairs in June.");
    harness.run_check(resource.id).await;

    harness.notify_worker.drain().await.expect("drain");
    harness.backfill.reconcile().await.expect("reconcile");
    harness.notify_worker.drain().await.expect("drain again");

    let change = harness.store.changes_for(resource.id).pop().expect("change");
    assert_eq!(change.delivery_status, DeliveryStatus::Sent);
    assert_eq!(harness.channel.sent_for(change.id), 1);
    assert!(harness.channel.sent()[0].1.summary.contains("pool closes"));
}
