//! PostgreSQL を使う統合テスト。
//!
//! `DATABASE_URL` に空のデータベースを指定して `cargo test -- --ignored` で実行する。

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingChannel, StaticFetcher};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;
use watchpoint_worker::monitor::{MonitorPipeline, MonitorStatus};
use watchpoint_worker::noise::NoiseClassifier;
use watchpoint_worker::notify::{ChannelRegistry, DeliverySettings, NotificationPipeline};
use watchpoint_worker::observability::metrics::Metrics;
use watchpoint_worker::queue::JobProducer;
use watchpoint_worker::scheduler::LockManager;
use watchpoint_worker::store::dao::{NotificationDao, PgStore};
use watchpoint_worker::store::models::NotificationStatus;

async fn connect() -> Arc<PgStore> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("connect");
    let store = Arc::new(PgStore::new(pool));
    store.migrate().await.expect("migrate");
    store
}

async fn seed_resource(store: &PgStore) -> Uuid {
    let subscriber_id = Uuid::new_v4();
    let resource_id = Uuid::new_v4();
    sqlx::query("INSERT INTO subscribers (id, channel, webhook_url) VALUES ($1, 'webhook', $2)")
        .bind(subscriber_id)
        .bind("https://hooks.example.org/watch")
        .execute(store.pool())
        .await
        .expect("insert subscriber");
    sqlx::query(
        "INSERT INTO monitored_resources (id, subscriber_id, name, target_url, next_due_at) \
         VALUES ($1, $2, 'Council agenda', 'https://council.example.org', NOW() - INTERVAL '1 minute')",
    )
    .bind(resource_id)
    .bind(subscriber_id)
    .execute(store.pool())
    .await
    .expect("insert resource");
    resource_id
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn lock_is_granted_once_and_queue_deduplicates() {
    let store = connect().await;
    store.ping().await.expect("ping");
    let resource_id = seed_resource(&store).await;
    let locks = LockManager::new(store.clone(), Duration::from_secs(300));

    assert!(locks.acquire(resource_id, "worker-a").await.expect("acquire a"));
    assert!(!locks.acquire(resource_id, "worker-b").await.expect("acquire b"));

    let producer = JobProducer::new(store.clone(), 3);
    let first = producer.enqueue_monitor(resource_id, "worker-a").await.expect("enqueue");
    let second = producer.enqueue_monitor(resource_id, "worker-a").await.expect("enqueue");
    assert!(first.is_some());
    assert!(second.is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn detected_change_is_delivered_exactly_once() {
    let store = connect().await;
    let resource_id = seed_resource(&store).await;
    let metrics = Metrics::standalone().expect("metrics");
    let fetcher = Arc::new(StaticFetcher::new("Agenda.\n\nItem 1: Budget review."));
    let monitor = MonitorPipeline::new(
        store.clone(),
        store.clone(),
        fetcher.clone(),
        NoiseClassifier::default(),
        common::MAX_CONTENT_BYTES,
        Arc::clone(&metrics),
    );

    monitor.process(resource_id).await.expect("first cycle");
    fetcher.set_body("Agenda.\n\nItem 1: Budget review.\n\nItem 2: Parking permits.");
    let outcome = monitor.process(resource_id).await.expect("second cycle");
    assert_eq!(outcome.status, MonitorStatus::ChangeDetected);
    let change_id = outcome.change_id.expect("change id");

    let channel = Arc::new(RecordingChannel::new("webhook"));
    let notifier = NotificationPipeline::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        ChannelRegistry::new().with(channel.clone()),
        "worker-a",
        DeliverySettings::default(),
        metrics,
    );
    for _ in 0..3 {
        assert!(notifier.deliver(change_id).await.expect("deliver").success);
    }

    assert_eq!(channel.sent_for(change_id), 1);
    let sent = store
        .records_for_change(change_id)
        .await
        .expect("records")
        .into_iter()
        .filter(|record| record.status == NotificationStatus::Sent)
        .count();
    assert_eq!(sent, 1);
}
