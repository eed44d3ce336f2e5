pub mod metrics;
pub mod tracing;

use std::sync::Arc;

use anyhow::{Context, Result};
use opentelemetry_sdk::trace::SdkTracerProvider;
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;

/// Telemetry（メトリクスとトレーシング）を管理する構造体。
///
/// メトリクスはプロセス専用のレジストリに登録し、`/metrics`ではそのレジストリのみを出力する。
#[derive(Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    /// トレーシングとメトリクスを初期化する。
    ///
    /// # Errors
    /// サブスクライバまたはメトリクスの初期化に失敗した場合はエラーを返す。
    pub fn new(otel_endpoint: Option<&str>, sampling_ratio: f64) -> Result<Self> {
        let tracer_provider = tracing::init(otel_endpoint, sampling_ratio)?;
        let mut telemetry = Self::metrics_only()?;
        telemetry.tracer_provider = tracer_provider;
        Ok(telemetry)
    }

    /// トレーシングを初期化せずにメトリクスだけを用意する。
    ///
    /// # Errors
    /// メトリクスの登録に失敗した場合はエラーを返す。
    pub fn metrics_only() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(&registry).context("failed to register metrics")?);
        Ok(Self {
            registry,
            metrics,
            tracer_provider: None,
        })
    }

    /// メトリクスへのアクセスを提供する。
    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Prometheusメトリクスをテキスト形式でレンダリングする。
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(error) = encoder.encode(&metric_families, &mut buffer) {
            ::tracing::warn!(error = %error, "failed to encode prometheus metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// 未送信のスパンをフラッシュしてエクスポーターを停止する。
    pub fn shutdown(&self) {
        if let Some(provider) = &self.tracer_provider
            && let Err(error) = provider.shutdown()
        {
            ::tracing::warn!(error = %error, "failed to shut down tracer provider");
        }
    }
}
