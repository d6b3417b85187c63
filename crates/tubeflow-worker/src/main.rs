//! Download invocation worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tubeflow_media::{EngineConfig, YtDlpEngine};
use tubeflow_queue::{InvocationQueue, RedisProgressStore};
use tubeflow_storage::{LocalDirectoryPersister, RoutingPersister, S3Config, S3DirectoryPersister};
use tubeflow_worker::{
    metrics, Executor, ExecutorConfig, InvocationRunner, ProgressTracker, WorkerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting tubeflow-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port)?;
        info!("Prometheus metrics listening on port {}", port);
    }

    let engine_config = EngineConfig::from_env()?;
    let engine = YtDlpEngine::locate(&engine_config.binary)?;
    info!("Using engine binary {}", engine.binary().display());

    let s3 = match S3Config::from_env() {
        Some(s3_config) => Some(
            S3DirectoryPersister::from_config(&s3_config)
                .await
                .context("failed to create S3 persister")?,
        ),
        None => {
            warn!("S3 is not configured, only local destinations are available");
            None
        }
    };
    let local = config
        .local_output_root
        .as_ref()
        .map(LocalDirectoryPersister::new);
    let persister = RoutingPersister::new(s3, local);

    let store = Arc::new(RedisProgressStore::from_env().context("failed to create progress store")?);
    let tracker = ProgressTracker::new(store.clone(), store.keys().clone());

    let queue = InvocationQueue::from_env().context("failed to create invocation queue")?;

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("failed to create {}", config.work_dir.display()))?;

    let executor = Executor::new(
        Arc::new(engine),
        Arc::new(persister),
        tracker,
        ExecutorConfig::new(&config, &engine_config),
    );

    let runner = InvocationRunner::new(config, queue, store, executor);

    runner
        .run(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
        })
        .await?;

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("tubeflow=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}
