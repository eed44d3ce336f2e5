#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use watchpoint_worker::clients::{ContentFetcher, FetchError, FetchTarget, FetchedContent};
use watchpoint_worker::monitor::{MonitorJobHandler, MonitorPipeline};
use watchpoint_worker::noise::NoiseClassifier;
use watchpoint_worker::notify::{
    BackfillScanner, BackfillSettings, ChannelRegistry, DeliveryChannel, DeliveryError,
    DeliverySettings, Notification, NotificationPipeline, NotifyJobHandler,
};
use watchpoint_worker::observability::metrics::Metrics;
use watchpoint_worker::queue::{JobProducer, QueueWorker, QueueWorkerConfig};
use watchpoint_worker::scheduler::{DueDispatcher, LockManager};
use watchpoint_worker::store::dao::MemoryStore;
use watchpoint_worker::store::models::{MonitoredResource, Subscriber};
use watchpoint_worker::util::retry::RetryConfig;

pub const MAX_CONTENT_BYTES: usize = 512_000;

/// Serves whatever body (or HTTP status failure) it was last given.
pub struct StaticFetcher {
    response: Mutex<Result<String, u16>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new(body: &str) -> Self {
        Self {
            response: Mutex::new(Ok(body.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_body(&self, body: &str) {
        *self.response.lock().unwrap_or_else(PoisonError::into_inner) = Ok(body.to_string());
    }

    pub fn fail_with_status(&self, status: u16) {
        *self.response.lock().unwrap_or_else(PoisonError::into_inner) = Err(status);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch(&self, target: &FetchTarget) -> Result<FetchedContent, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match response {
            Ok(content) => Ok(FetchedContent {
                content,
                status_code: 200,
                fetch_duration_ms: 12,
            }),
            Err(status) => Err(FetchError::Status {
                url: target.url.clone(),
                status,
            }),
        }
    }
}

/// Channel that remembers every send and can be told to fail.
pub struct RecordingChannel {
    name: String,
    sent: Mutex<Vec<(String, Notification)>>,
    failing: AtomicBool,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sent_for(&self, change_id: Uuid) -> usize {
        self.sent()
            .iter()
            .filter(|(_, notification)| notification.change_id == change_id)
            .count()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Smtp("relay refused message".to_string()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((recipient.to_string(), notification.clone()));
        Ok(())
    }
}

/// The whole worker wired over one in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<StaticFetcher>,
    pub channel: Arc<RecordingChannel>,
    pub metrics: Arc<Metrics>,
    pub producer: JobProducer,
    pub locks: Arc<LockManager>,
    pub dispatcher: Arc<DueDispatcher>,
    pub monitor: Arc<MonitorPipeline>,
    pub notifier: Arc<NotificationPipeline>,
    pub backfill: BackfillScanner,
    pub monitor_worker: QueueWorker,
    pub notify_worker: QueueWorker,
}

impl Harness {
    pub fn new(initial_body: &str) -> Self {
        Self::with_owner(Arc::new(MemoryStore::new()), initial_body, "worker-test")
    }

    /// A second worker process sharing `store`.
    pub fn with_owner(store: Arc<MemoryStore>, initial_body: &str, owner: &str) -> Self {
        let metrics = Metrics::standalone().expect("metrics");
        let fetcher = Arc::new(StaticFetcher::new(initial_body));
        let channel = Arc::new(RecordingChannel::new("webhook"));
        let producer = JobProducer::new(store.clone(), 3);
        let locks = Arc::new(LockManager::new(store.clone(), Duration::from_secs(300)));
        let dispatcher = Arc::new(DueDispatcher::new(
            Arc::clone(&locks),
            producer.clone(),
            owner,
            10,
            Arc::clone(&metrics),
        ));
        let monitor = Arc::new(MonitorPipeline::new(
            store.clone(),
            store.clone(),
            fetcher.clone(),
            NoiseClassifier::default(),
            MAX_CONTENT_BYTES,
            Arc::clone(&metrics),
        ));
        let notifier = Arc::new(NotificationPipeline::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            ChannelRegistry::new().with(channel.clone()),
            owner,
            DeliverySettings {
                claim_timeout: Duration::from_secs(120),
                record_retry: RetryConfig::new(3, 0, 0),
            },
            Arc::clone(&metrics),
        ));
        let backfill = BackfillScanner::new(
            store.clone(),
            store.clone(),
            producer.clone(),
            BackfillSettings::default(),
            Arc::clone(&metrics),
        );

        let worker_config = QueueWorkerConfig {
            retry: RetryConfig::new(4, 0, 0),
            ..QueueWorkerConfig::default()
        };
        let monitor_worker = QueueWorker::new(
            store.clone(),
            Arc::new(MonitorJobHandler::new(
                Arc::clone(&monitor),
                Arc::clone(&locks),
                producer.clone(),
            )),
            worker_config.clone(),
            Arc::clone(&metrics),
        );
        let notify_worker = QueueWorker::new(
            store.clone(),
            Arc::new(NotifyJobHandler::new(Arc::clone(&notifier))),
            worker_config,
            Arc::clone(&metrics),
        );

        Self {
            store,
            fetcher,
            channel,
            metrics,
            producer,
            locks,
            dispatcher,
            monitor,
            notifier,
            backfill,
            monitor_worker,
            notify_worker,
        }
    }

    /// Registers a webhook subscriber and one of their resources, due now.
    pub fn add_resource(&self) -> MonitoredResource {
        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            channel: "webhook".to_string(),
            email: None,
            webhook_url: Some("https://hooks.example.org/watch".to_string()),
        };
        let mut resource =
            MonitoredResource::new(subscriber.id, "https://council.example.org/agenda", 60);
        resource.name = Some("Council agenda".to_string());
        self.store.insert_subscriber(subscriber);
        self.store.insert_resource(resource.clone());
        resource
    }

    /// Forces the resource due, dispatches it and runs the monitor queue dry.
    pub async fn run_check(&self, resource_id: Uuid) {
        let mut resource = self.store.resource(resource_id).expect("resource exists");
        resource.next_due_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        self.store.insert_resource(resource);
        self.dispatcher
            .dispatch_one(resource_id)
            .await
            .expect("dispatch");
        self.monitor_worker.drain().await.expect("drain monitor queue");
    }
}
