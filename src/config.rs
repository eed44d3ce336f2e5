use std::{
    env,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    time::Duration,
};

use thiserror::Error;

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// SMTP接続設定。`SMTP_HOST`が設定されている場合のみ有効になる。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    from: String,
}

impl SmtpConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
            from: from.into(),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    #[must_use]
    pub fn from(&self) -> &str {
        &self.from
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    http_bind: SocketAddr,
    watch_db_dsn: String,
    watch_db_max_connections: u32,
    watch_db_min_connections: u32,
    watch_db_acquire_timeout: Duration,
    watch_db_idle_timeout: Duration,
    watch_db_max_lifetime: Duration,
    scheduler_poll_interval: Duration,
    scheduler_batch_limit: u32,
    lock_timeout: Duration,
    monitor_concurrency: NonZeroUsize,
    monitor_rate_per_minute: u32,
    notify_concurrency: NonZeroUsize,
    fetch_connect_timeout: Duration,
    fetch_total_timeout: Duration,
    fetch_user_agent: String,
    fetch_max_body_bytes: NonZeroUsize,
    snapshot_max_content_bytes: usize,
    noise_patterns_path: Option<PathBuf>,
    backfill_interval: Duration,
    backfill_window_hours: u32,
    backfill_batch_size: u32,
    queue_max_retries: u32,
    queue_retry_base_ms: u64,
    queue_retry_cap_ms: u64,
    queue_visibility_timeout: Duration,
    queue_poll_interval: Duration,
    delivery_claim_timeout: Duration,
    webhook_timeout: Duration,
    smtp: Option<SmtpConfig>,
    snapshot_sweep_hour_utc: u32,
    snapshot_retention_days: u32,
    snapshot_keep_per_resource: NonZeroU32,
    otel_exporter_endpoint: Option<String>,
    otel_sampling_ratio: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から監視ワーカーの設定値を読み込み、検証する。
    ///
    /// 必須の環境変数が揃っていない場合や、数値／アドレスのパースに失敗した場合はエラーを返す。
    ///
    /// # Errors
    /// `WATCH_DB_DSN` が未設定、もしくは各種値のパースに失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let watch_db_dsn = env_var("WATCH_DB_DSN")?;
        let http_bind = parse_socket_addr("WATCH_WORKER_HTTP_BIND", "0.0.0.0:9010")?;

        // Database connection pool settings
        let watch_db_max_connections = parse_u32("WATCH_DB_MAX_CONNECTIONS", 20)?;
        let watch_db_min_connections = parse_u32("WATCH_DB_MIN_CONNECTIONS", 2)?;
        let watch_db_acquire_timeout = parse_duration_secs("WATCH_DB_ACQUIRE_TIMEOUT_SECS", 30)?;
        let watch_db_idle_timeout = parse_duration_secs("WATCH_DB_IDLE_TIMEOUT_SECS", 600)?;
        let watch_db_max_lifetime = parse_duration_secs("WATCH_DB_MAX_LIFETIME_SECS", 1800)?;

        // Scheduling and locking
        let scheduler_poll_interval = parse_duration_secs("SCHEDULER_POLL_INTERVAL_SECS", 300)?;
        let scheduler_batch_limit = parse_u32("SCHEDULER_BATCH_LIMIT", 10)?;
        let lock_timeout = parse_duration_secs("LOCK_TIMEOUT_SECS", 300)?;

        // Worker pools
        let monitor_concurrency = parse_non_zero_usize("MONITOR_CONCURRENCY", 10)?;
        let monitor_rate_per_minute = parse_u32("MONITOR_RATE_PER_MINUTE", 100)?;
        let notify_concurrency = parse_non_zero_usize("NOTIFY_CONCURRENCY", 5)?;

        // Fetching
        let fetch_connect_timeout = parse_duration_ms("FETCH_CONNECT_TIMEOUT_MS", 5000)?;
        let fetch_total_timeout = parse_duration_ms("FETCH_TOTAL_TIMEOUT_MS", 30000)?;
        let fetch_user_agent = env::var("FETCH_USER_AGENT")
            .unwrap_or_else(|_| concat!("watchpoint-worker/", env!("CARGO_PKG_VERSION")).to_string());
        let fetch_max_body_bytes = parse_non_zero_usize("FETCH_MAX_BODY_BYTES", 5 * 1024 * 1024)?;
        let snapshot_max_content_bytes = parse_usize("SNAPSHOT_MAX_CONTENT_BYTES", 512_000)?;
        let noise_patterns_path = env::var("NOISE_PATTERNS_PATH").ok().map(PathBuf::from);

        // Backfill
        let backfill_interval = parse_duration_secs("BACKFILL_INTERVAL_SECS", 120)?;
        let backfill_window_hours = parse_u32("BACKFILL_WINDOW_HOURS", 24)?;
        let backfill_batch_size = parse_u32("BACKFILL_BATCH_SIZE", 50)?;

        // Queue retry settings (exponential backoff + jitter)
        let queue_max_retries = parse_u32("QUEUE_MAX_RETRIES", 3)?;
        let queue_retry_base_ms = parse_u64("QUEUE_RETRY_BASE_MS", 1000)?;
        let queue_retry_cap_ms = parse_u64("QUEUE_RETRY_CAP_MS", 60000)?;
        let queue_visibility_timeout = parse_duration_secs("QUEUE_VISIBILITY_TIMEOUT_SECS", 600)?;
        let queue_poll_interval = parse_duration_ms("QUEUE_POLL_INTERVAL_MS", 1000)?;

        // Delivery
        let delivery_claim_timeout = parse_duration_secs("DELIVERY_CLAIM_TIMEOUT_SECS", 120)?;
        let webhook_timeout = parse_duration_ms("WEBHOOK_TIMEOUT_MS", 10000)?;
        let smtp = parse_smtp()?;

        // Snapshot retention
        let snapshot_sweep_hour_utc = parse_hour("SNAPSHOT_SWEEP_HOUR_UTC", 3)?;
        let snapshot_retention_days = parse_u32("SNAPSHOT_RETENTION_DAYS", 30)?;
        // 最新スナップショットは常に残す
        let snapshot_keep_per_resource = parse_non_zero_u32("SNAPSHOT_KEEP_PER_RESOURCE", 100)?;

        // OpenTelemetry settings
        let otel_exporter_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        let otel_sampling_ratio = parse_ratio("OTEL_SAMPLING_RATIO", 1.0)?;

        Ok(Self {
            http_bind,
            watch_db_dsn,
            watch_db_max_connections,
            watch_db_min_connections,
            watch_db_acquire_timeout,
            watch_db_idle_timeout,
            watch_db_max_lifetime,
            scheduler_poll_interval,
            scheduler_batch_limit,
            lock_timeout,
            monitor_concurrency,
            monitor_rate_per_minute,
            notify_concurrency,
            fetch_connect_timeout,
            fetch_total_timeout,
            fetch_user_agent,
            fetch_max_body_bytes,
            snapshot_max_content_bytes,
            noise_patterns_path,
            backfill_interval,
            backfill_window_hours,
            backfill_batch_size,
            queue_max_retries,
            queue_retry_base_ms,
            queue_retry_cap_ms,
            queue_visibility_timeout,
            queue_poll_interval,
            delivery_claim_timeout,
            webhook_timeout,
            smtp,
            snapshot_sweep_hour_utc,
            snapshot_retention_days,
            snapshot_keep_per_resource,
            otel_exporter_endpoint,
            otel_sampling_ratio,
        })
    }

    #[must_use]
    pub fn http_bind(&self) -> SocketAddr {
        self.http_bind
    }

    #[must_use]
    pub fn watch_db_dsn(&self) -> &str {
        &self.watch_db_dsn
    }

    #[must_use]
    pub fn watch_db_max_connections(&self) -> u32 {
        self.watch_db_max_connections
    }

    #[must_use]
    pub fn watch_db_min_connections(&self) -> u32 {
        self.watch_db_min_connections
    }

    #[must_use]
    pub fn watch_db_acquire_timeout(&self) -> Duration {
        self.watch_db_acquire_timeout
    }

    #[must_use]
    pub fn watch_db_idle_timeout(&self) -> Duration {
        self.watch_db_idle_timeout
    }

    #[must_use]
    pub fn watch_db_max_lifetime(&self) -> Duration {
        self.watch_db_max_lifetime
    }

    #[must_use]
    pub fn scheduler_poll_interval(&self) -> Duration {
        self.scheduler_poll_interval
    }

    #[must_use]
    pub fn scheduler_batch_limit(&self) -> u32 {
        self.scheduler_batch_limit
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    #[must_use]
    pub fn monitor_concurrency(&self) -> NonZeroUsize {
        self.monitor_concurrency
    }

    /// 0 は無制限。
    #[must_use]
    pub fn monitor_rate_per_minute(&self) -> u32 {
        self.monitor_rate_per_minute
    }

    #[must_use]
    pub fn notify_concurrency(&self) -> NonZeroUsize {
        self.notify_concurrency
    }

    #[must_use]
    pub fn fetch_connect_timeout(&self) -> Duration {
        self.fetch_connect_timeout
    }

    #[must_use]
    pub fn fetch_total_timeout(&self) -> Duration {
        self.fetch_total_timeout
    }

    #[must_use]
    pub fn fetch_user_agent(&self) -> &str {
        &self.fetch_user_agent
    }

    #[must_use]
    pub fn fetch_max_body_bytes(&self) -> usize {
        self.fetch_max_body_bytes.get()
    }

    #[must_use]
    pub fn snapshot_max_content_bytes(&self) -> usize {
        self.snapshot_max_content_bytes
    }

    #[must_use]
    pub fn noise_patterns_path(&self) -> Option<&std::path::Path> {
        self.noise_patterns_path.as_deref()
    }

    #[must_use]
    pub fn backfill_interval(&self) -> Duration {
        self.backfill_interval
    }

    #[must_use]
    pub fn backfill_window_hours(&self) -> u32 {
        self.backfill_window_hours
    }

    #[must_use]
    pub fn backfill_batch_size(&self) -> u32 {
        self.backfill_batch_size
    }

    #[must_use]
    pub fn queue_max_retries(&self) -> u32 {
        self.queue_max_retries
    }

    #[must_use]
    pub fn queue_retry_base_ms(&self) -> u64 {
        self.queue_retry_base_ms
    }

    #[must_use]
    pub fn queue_retry_cap_ms(&self) -> u64 {
        self.queue_retry_cap_ms
    }

    #[must_use]
    pub fn queue_visibility_timeout(&self) -> Duration {
        self.queue_visibility_timeout
    }

    #[must_use]
    pub fn queue_poll_interval(&self) -> Duration {
        self.queue_poll_interval
    }

    #[must_use]
    pub fn delivery_claim_timeout(&self) -> Duration {
        self.delivery_claim_timeout
    }

    #[must_use]
    pub fn webhook_timeout(&self) -> Duration {
        self.webhook_timeout
    }

    #[must_use]
    pub fn smtp(&self) -> Option<&SmtpConfig> {
        self.smtp.as_ref()
    }

    #[must_use]
    pub fn snapshot_sweep_hour_utc(&self) -> u32 {
        self.snapshot_sweep_hour_utc
    }

    #[must_use]
    pub fn snapshot_retention_days(&self) -> u32 {
        self.snapshot_retention_days
    }

    #[must_use]
    pub fn snapshot_keep_per_resource(&self) -> u32 {
        self.snapshot_keep_per_resource.get()
    }

    #[must_use]
    pub fn otel_exporter_endpoint(&self) -> Option<&str> {
        self.otel_exporter_endpoint.as_deref()
    }

    #[must_use]
    pub fn otel_sampling_ratio(&self) -> f64 {
        self.otel_sampling_ratio
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_smtp() -> Result<Option<SmtpConfig>, ConfigError> {
    let Ok(host) = env::var("SMTP_HOST") else {
        return Ok(None);
    };
    let port = parse_u16("SMTP_PORT", 587)?;
    let from = env_var("SMTP_FROM")?;

    Ok(Some(SmtpConfig {
        host,
        port,
        username: env::var("SMTP_USERNAME").ok(),
        password: env::var("SMTP_PASSWORD").ok(),
        from,
    }))
}

fn parse_socket_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());

    raw.parse().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_non_zero_u32(name: &'static str, default: u32) -> Result<NonZeroU32, ConfigError> {
    let parsed = parse_u32(name, default)?;
    NonZeroU32::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(value))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u16(name: &'static str, default: u16) -> Result<u16, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u16>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_hour(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let parsed = parse_u32(name, default)?;
    if parsed > 23 {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("hour must be between 0 and 23"),
        });
    }
    Ok(parsed)
}

fn parse_ratio(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("ratio must be between 0.0 and 1.0"),
        });
    }
    Ok(parsed)
}
