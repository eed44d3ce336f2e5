use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tokio::{sync::watch, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    api,
    clients::{ContentFetcher, HttpContentFetcher, HttpFetcherConfig},
    config::Config,
    monitor::{MonitorJobHandler, MonitorPipeline, SnapshotRetention},
    noise::{NoiseClassifier, NoisePatternSet},
    notify::{
        BackfillScanner, BackfillSettings, ChannelRegistry, DeliverySettings, EmailChannel,
        NotificationPipeline, NotifyJobHandler, WebhookChannel,
    },
    observability::Telemetry,
    queue::{JobProducer, QueueStore, QueueWorker, QueueWorkerConfig},
    scheduler::{
        DailyCadence, DueDispatcher, LockManager, spawn_backfill_daemon, spawn_retention_daemon,
        spawn_scheduler_daemon, worker_id,
    },
    store::dao::{
        ChangeDao, NotificationDao, PgStore, ResourceDao, SnapshotDao, StoreHealth,
        SubscriberDirectory,
    },
    util::retry::RetryConfig,
};

/// Every store seam the worker talks to.
#[derive(Clone)]
pub struct Stores {
    pub resources: Arc<dyn ResourceDao>,
    pub snapshots: Arc<dyn SnapshotDao>,
    pub changes: Arc<dyn ChangeDao>,
    pub notifications: Arc<dyn NotificationDao>,
    pub subscribers: Arc<dyn SubscriberDirectory>,
    pub queue: Arc<dyn QueueStore>,
    pub health: Arc<dyn StoreHealth>,
}

impl Stores {
    /// All seams served by one backing store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ResourceDao
            + SnapshotDao
            + ChangeDao
            + NotificationDao
            + SubscriberDirectory
            + QueueStore
            + StoreHealth
            + 'static,
    {
        Self {
            resources: store.clone(),
            snapshots: store.clone(),
            changes: store.clone(),
            notifications: store.clone(),
            subscribers: store.clone(),
            queue: store.clone(),
            health: store,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

impl AppState {
    pub(crate) fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn health(&self) -> Arc<dyn StoreHealth> {
        Arc::clone(&self.registry.stores.health)
    }

    pub(crate) fn dispatcher(&self) -> Arc<DueDispatcher> {
        Arc::clone(&self.registry.dispatcher)
    }

    pub(crate) fn notifier(&self) -> Arc<NotificationPipeline> {
        Arc::clone(&self.registry.notifier)
    }

    pub(crate) fn backfill(&self) -> Arc<BackfillScanner> {
        Arc::clone(&self.registry.backfill)
    }
}

/// Shared components of one worker process.
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    stores: Stores,
    dispatcher: Arc<DueDispatcher>,
    notifier: Arc<NotificationPipeline>,
    backfill: Arc<BackfillScanner>,
    retention: Arc<SnapshotRetention>,
    monitor_worker: Arc<QueueWorker>,
    notify_worker: Arc<QueueWorker>,
}

impl ComponentRegistry {
    /// PostgreSQL、HTTPフェッチャー、配信チャネルを構成してレジストリを組み立てる。
    ///
    /// # Errors
    /// プール構成、マイグレーション、ノイズパターン読み込み、クライアント構築のいずれかが
    /// 失敗した場合はエラーを返す。
    pub async fn build(config: Config, telemetry: Telemetry) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.watch_db_max_connections())
            .min_connections(config.watch_db_min_connections())
            .acquire_timeout(config.watch_db_acquire_timeout())
            .idle_timeout(Some(config.watch_db_idle_timeout()))
            .max_lifetime(Some(config.watch_db_max_lifetime()))
            .test_before_acquire(true)
            .connect_lazy(config.watch_db_dsn())
            .context("failed to configure watch_db connection pool")?;
        let store = Arc::new(PgStore::new(pool));
        store.migrate().await?;

        let patterns = match config.noise_patterns_path() {
            Some(path) => NoisePatternSet::load(path)
                .with_context(|| format!("failed to load noise patterns from {}", path.display()))?,
            None => NoisePatternSet::builtin(),
        };
        info!(
            version = patterns.version(),
            patterns = patterns.patterns().len(),
            "noise patterns loaded"
        );

        let fetcher = HttpContentFetcher::new(&HttpFetcherConfig {
            connect_timeout: config.fetch_connect_timeout(),
            total_timeout: config.fetch_total_timeout(),
            user_agent: config.fetch_user_agent().to_string(),
            max_body_bytes: config.fetch_max_body_bytes(),
        })?;

        let webhook = WebhookChannel::new(config.webhook_timeout(), RetryConfig::default())
            .context("failed to build webhook channel")?;
        let mut channels = ChannelRegistry::new().with(Arc::new(webhook));
        if let Some(smtp) = config.smtp() {
            let email = EmailChannel::from_config(smtp).context("failed to build email channel")?;
            channels = channels.with(Arc::new(email));
        }
        info!(channels = ?channels.names(), "delivery channels configured");

        Ok(Self::assemble(
            config,
            telemetry,
            Stores::shared(store),
            Arc::new(fetcher),
            NoiseClassifier::new(patterns),
            channels,
        ))
    }

    /// Wires pipelines, workers and daemons on top of already constructed seams.
    #[must_use]
    pub fn assemble(
        config: Config,
        telemetry: Telemetry,
        stores: Stores,
        fetcher: Arc<dyn ContentFetcher>,
        classifier: NoiseClassifier,
        channels: ChannelRegistry,
    ) -> Self {
        let config = Arc::new(config);
        let metrics = telemetry.metrics();
        let owner = worker_id();
        let producer = JobProducer::new(Arc::clone(&stores.queue), config.queue_max_retries());

        let locks = Arc::new(LockManager::new(
            Arc::clone(&stores.resources),
            config.lock_timeout(),
        ));
        let dispatcher = Arc::new(DueDispatcher::new(
            Arc::clone(&locks),
            producer.clone(),
            owner.clone(),
            config.scheduler_batch_limit(),
            Arc::clone(&metrics),
        ));

        let monitor = Arc::new(MonitorPipeline::new(
            Arc::clone(&stores.resources),
            Arc::clone(&stores.snapshots),
            fetcher,
            classifier,
            config.snapshot_max_content_bytes(),
            Arc::clone(&metrics),
        ));
        let notifier = Arc::new(NotificationPipeline::new(
            Arc::clone(&stores.changes),
            Arc::clone(&stores.notifications),
            Arc::clone(&stores.subscribers),
            Arc::clone(&stores.resources),
            channels,
            owner,
            DeliverySettings {
                claim_timeout: config.delivery_claim_timeout(),
                ..DeliverySettings::default()
            },
            Arc::clone(&metrics),
        ));
        let backfill = Arc::new(BackfillScanner::new(
            Arc::clone(&stores.changes),
            Arc::clone(&stores.notifications),
            producer.clone(),
            BackfillSettings::new(config.backfill_window_hours(), config.backfill_batch_size()),
            Arc::clone(&metrics),
        ));
        let retention = Arc::new(SnapshotRetention::new(
            Arc::clone(&stores.snapshots),
            config.snapshot_keep_per_resource(),
            std::time::Duration::from_secs(u64::from(config.snapshot_retention_days()) * 86_400),
            Arc::clone(&metrics),
        ));

        let retry = RetryConfig::new(
            usize::try_from(config.queue_max_retries()).unwrap_or(usize::MAX) + 1,
            config.queue_retry_base_ms(),
            config.queue_retry_cap_ms(),
        );
        let monitor_worker = Arc::new(QueueWorker::new(
            Arc::clone(&stores.queue),
            Arc::new(MonitorJobHandler::new(monitor, locks, producer)),
            QueueWorkerConfig {
                concurrency: config.monitor_concurrency().get(),
                rate_per_minute: Some(config.monitor_rate_per_minute()).filter(|rate| *rate > 0),
                poll_interval: config.queue_poll_interval(),
                visibility_timeout: config.queue_visibility_timeout(),
                retry,
            },
            Arc::clone(&metrics),
        ));
        let notify_worker = Arc::new(QueueWorker::new(
            Arc::clone(&stores.queue),
            Arc::new(NotifyJobHandler::new(Arc::clone(&notifier))),
            QueueWorkerConfig {
                concurrency: config.notify_concurrency().get(),
                rate_per_minute: None,
                poll_interval: config.queue_poll_interval(),
                visibility_timeout: config.queue_visibility_timeout(),
                retry,
            },
            metrics,
        ));

        Self {
            config,
            telemetry,
            stores,
            dispatcher,
            notifier,
            backfill,
            retention,
            monitor_worker,
            notify_worker,
        }
    }

    /// Starts both queue workers and the scheduler, backfill and retention daemons.
    ///
    /// # Errors
    /// The configured sweep hour does not form a valid time of day.
    pub fn spawn_background(&self, shutdown: &watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let cadence = DailyCadence::utc(self.config.snapshot_sweep_hour_utc(), 0)?;
        let monitor_worker = Arc::clone(&self.monitor_worker);
        let notify_worker = Arc::clone(&self.notify_worker);
        let monitor_shutdown = shutdown.clone();
        let notify_shutdown = shutdown.clone();

        Ok(vec![
            tokio::spawn(async move { monitor_worker.run(monitor_shutdown).await }),
            tokio::spawn(async move { notify_worker.run(notify_shutdown).await }),
            spawn_scheduler_daemon(
                Arc::clone(&self.dispatcher),
                self.config.scheduler_poll_interval(),
                shutdown.clone(),
            ),
            spawn_backfill_daemon(
                Arc::clone(&self.backfill),
                self.config.backfill_interval(),
                shutdown.clone(),
            ),
            spawn_retention_daemon(Arc::clone(&self.retention), cadence, shutdown.clone()),
        ])
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<DueDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    #[must_use]
    pub fn monitor_worker(&self) -> Arc<QueueWorker> {
        Arc::clone(&self.monitor_worker)
    }

    #[must_use]
    pub fn notify_worker(&self) -> Arc<QueueWorker> {
        Arc::clone(&self.notify_worker)
    }

    #[must_use]
    pub fn backfill(&self) -> Arc<BackfillScanner> {
        Arc::clone(&self.backfill)
    }
}

pub fn build_router(registry: Arc<ComponentRegistry>) -> Router {
    let state = AppState::new(registry);
    api::router(state).layer(TraceLayer::new_for_http())
}
