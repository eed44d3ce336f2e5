/// Prometheusメトリクス定義。
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGaugeVec, Registry, histogram_opts,
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // スケジューラ
    pub scheduler_ticks: IntCounter,
    pub scheduler_dispatched: IntCounter,
    pub lock_conflicts: IntCounter,
    pub dispatch_deduplicated: IntCounter,

    // 監視パイプライン
    pub monitor_checks: IntCounterVec,
    pub fetch_duration: Histogram,
    pub check_duration: Histogram,

    // 通知とバックフィル
    pub notifications: IntCounterVec,
    pub backfill_enqueued: IntCounter,

    // 保守
    pub snapshots_pruned: IntCounter,

    // キュー
    pub queue_jobs: IntCounterVec,
    pub active_jobs: IntGaugeVec,
}

impl Metrics {
    /// 指定されたレジストリにメトリクスを登録する。
    ///
    /// # Errors
    /// 同名のメトリクスが既に登録されている場合はエラーを返す。
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            scheduler_ticks: register_int_counter_with_registry!(
                "watchpoint_scheduler_ticks_total",
                "Number of scheduler polling cycles",
                registry
            )?,
            scheduler_dispatched: register_int_counter_with_registry!(
                "watchpoint_scheduler_dispatched_total",
                "Number of resources locked and dispatched to the monitor queue",
                registry
            )?,
            lock_conflicts: register_int_counter_with_registry!(
                "watchpoint_lock_conflicts_total",
                "Number of lock acquisitions lost to another worker",
                registry
            )?,
            dispatch_deduplicated: register_int_counter_with_registry!(
                "watchpoint_dispatch_deduplicated_total",
                "Number of dispatches dropped because a monitor job was already live",
                registry
            )?,
            monitor_checks: register_int_counter_vec_with_registry!(
                "watchpoint_monitor_checks_total",
                "Number of monitor cycles by outcome",
                &["status"],
                registry
            )?,
            fetch_duration: register_histogram_with_registry!(
                histogram_opts!(
                    "watchpoint_fetch_duration_seconds",
                    "Duration of content fetches",
                    vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
                ),
                registry
            )?,
            check_duration: register_histogram_with_registry!(
                "watchpoint_check_duration_seconds",
                "Duration of entire monitor cycles",
                registry
            )?,
            notifications: register_int_counter_vec_with_registry!(
                "watchpoint_notifications_total",
                "Number of delivery attempts by result",
                &["result"],
                registry
            )?,
            backfill_enqueued: register_int_counter_with_registry!(
                "watchpoint_backfill_enqueued_total",
                "Number of pending changes re-enqueued by the backfill scanner",
                registry
            )?,
            snapshots_pruned: register_int_counter_with_registry!(
                "watchpoint_snapshots_pruned_total",
                "Number of snapshots deleted by the retention sweep",
                registry
            )?,
            queue_jobs: register_int_counter_vec_with_registry!(
                "watchpoint_queue_jobs_total",
                "Number of processed queue jobs by queue and result",
                &["queue", "result"],
                registry
            )?,
            active_jobs: register_int_gauge_vec_with_registry!(
                "watchpoint_active_jobs",
                "Number of currently running jobs",
                &["queue"],
                registry
            )?,
        })
    }

    /// 専用レジストリ付きで作成する。テストや単体利用向け。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合はエラーを返す。
    pub fn standalone() -> Result<Arc<Self>, prometheus::Error> {
        Ok(Arc::new(Self::new(&Registry::new())?))
    }
}
