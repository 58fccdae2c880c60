//! Counter API server.
//!
//! ```sh
//! API_SERVICE=counter PORT=8080 METRICS_ADDR=127.0.0.1:9090 cargo run -p counter-api
//! curl -X POST localhost:8080/counter/increment -H 'content-type: application/json' -d '{"by": 2}'
//! ```

use anyhow::Context;
use axum::{Router, routing::get};
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use txapi_runtime::metrics::MetricsServer;
use txapi_testing::InMemoryStore;
use txapi_web::{AppConfig, telemetry};

use counter_api::{DEFAULT_SERVICE, app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env_or(DEFAULT_SERVICE).context("invalid configuration")?;
    telemetry::init_tracing(&config.logging);
    if config.error_reporting.install_reporter() {
        info!(environment = %config.error_reporting.environment, "Crash reporting enabled");
    }

    info!(service = %config.service, "Starting counter API");

    if let Some(addr) = env_addr("METRICS_ADDR")? {
        serve_metrics(addr).await?;
    }

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let router = app(InMemoryStore::new(), config)?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

fn env_addr(key: &str) -> anyhow::Result<Option<SocketAddr>> {
    env::var(key)
        .ok()
        .map(|raw| raw.parse().with_context(|| format!("{key} is not a socket address")))
        .transpose()
}

async fn serve_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    let mut metrics = MetricsServer::new(addr);
    metrics.start()?;
    let Some(handle) = metrics.handle().cloned() else {
        warn!("Metrics recorder owned elsewhere, not serving /metrics");
        return Ok(());
    };

    let router = Router::new().route("/metrics", get(move || async move { handle.render() }));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics on {addr}"))?;
    info!(%addr, "Serving metrics");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            warn!(error = %e, "Metrics server stopped");
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
