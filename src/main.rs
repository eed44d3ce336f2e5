use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, warn};

use watchpoint_worker::{
    app::{ComponentRegistry, build_router},
    config::Config,
    observability::Telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let config = Config::from_env().context("failed to load configuration")?;
    let telemetry = Telemetry::new(config.otel_exporter_endpoint(), config.otel_sampling_ratio())
        .context("failed to initialize telemetry")?;
    let bind_addr = config.http_bind();

    let registry = Arc::new(
        ComponentRegistry::build(config, telemetry.clone())
            .await
            .context("failed to build component registry")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = registry
        .spawn_background(&shutdown_rx)
        .context("failed to start background tasks")?;

    let router = build_router(Arc::clone(&registry));
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;

    info!(%bind_addr, "listening");

    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });
    let server = tokio::spawn(async move { server.await });

    wait_for_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Err(error)) => warn!(error = %error, "server exited with error"),
        Err(error) => warn!(error = %error, "server task panicked"),
        Ok(Ok(())) => {}
    }
    for result in join_all(background).await {
        if let Err(error) = result {
            warn!(error = %error, "background task ended abnormally");
        }
    }

    // 未送信スパンをフラッシュする
    telemetry.shutdown();
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(error = %error, "failed to listen for SIGINT");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(error = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
