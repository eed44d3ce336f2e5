use std::sync::OnceLock;

use anyhow::{Context, Error, Result};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracer, SdkTracerProvider},
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "watchpoint-worker";

static TRACING_INIT: OnceLock<Option<SdkTracerProvider>> = OnceLock::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// `otel_endpoint`が与えられた場合はOTLPエクスポーターを追加し、初期化に失敗したら
/// JSONのfmtレイヤーのみで続行する。戻り値のプロバイダーは終了時のフラッシュに使う。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init(otel_endpoint: Option<&str>, sampling_ratio: f64) -> Result<Option<SdkTracerProvider>> {
    if let Some(provider) = TRACING_INIT.get() {
        return Ok(provider.clone());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();

    let (provider, otel_error) = match otel_endpoint.map(|endpoint| init_tracer(endpoint, sampling_ratio)) {
        Some(Ok((tracer, provider))) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|e| Error::msg(e.to_string()))?;
            (Some(provider), None)
        }
        Some(Err(error)) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| Error::msg(e.to_string()))?;
            (None, Some(error))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| Error::msg(e.to_string()))?;
            (None, None)
        }
    };

    match (&provider, otel_error) {
        (Some(_), _) => info!(
            otel_enabled = true,
            endpoint = otel_endpoint.unwrap_or_default(),
            sampling_ratio,
            "tracing initialized with OpenTelemetry"
        ),
        (None, Some(error)) => warn!(
            otel_enabled = false,
            error = %error,
            "tracing initialized without OpenTelemetry (init failed)"
        ),
        (None, None) => info!(otel_enabled = false, "standard tracing initialized"),
    }

    Ok(TRACING_INIT.get_or_init(|| provider).clone())
}

/// OTLPエクスポーター経由でOpenTelemetryトレーサーを初期化する。
fn init_tracer(endpoint: &str, sampling_ratio: f64) -> Result<(SdkTracer, SdkTracerProvider)> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let resource = Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::TraceIdRatioBased(sampling_ratio))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer(SERVICE_NAME);
    global::set_tracer_provider(tracer_provider.clone());

    Ok((tracer, tracer_provider))
}
