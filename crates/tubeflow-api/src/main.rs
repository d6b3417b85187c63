//! tubeflow HTTP ingress: accepts invocations, serves outcomes and progress.

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tubeflow_api::{create_router, metrics, ApiConfig, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // rediss:// connections need a process-wide provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    init_tracing()?;

    let config = ApiConfig::from_env();
    info!(
        bind = %config.bind,
        max_body_size = config.max_body_size,
        timeout_secs = config.request_timeout.as_secs(),
        "Starting tubeflow-api"
    );

    let state = AppState::new(config.clone()).context("failed to create application state")?;

    // Submissions work before any worker has created the consumer group
    match state.queue.init().await {
        Ok(()) => info!(stream = %state.queue.config().stream_name, "Invocation stream ready"),
        Err(e) => warn!("Invocation stream not reachable yet: {}", e),
    }

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("Accepting invocations on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        })
        .await?;

    info!("Ingress shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("tubeflow=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .with(env_filter)
            .init();
    }
    Ok(())
}
