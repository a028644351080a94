//! `hash-ai-worker run`: the long-running worker.

use std::path::Path;

use anyhow::Context;
use hash_ai_config::WorkerConfig;
use hash_ai_runtime::{DEFAULT_PROBE_TIMEOUT, Worker, default_registry, probe_broker, stdio};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{build_driver, usage_reporter};

pub async fn run(path: Option<&Path>) -> anyhow::Result<()> {
    let config = WorkerConfig::load(path).context("Failed to load config")?;
    config.validate_for_worker()?;

    info!(
        graph = %config.graph.endpoint().unwrap_or_default(),
        broker = %config.task_queue.address(),
        namespace = %config.task_queue.namespace,
        task_queue = %config.task_queue.task_queue,
        "Starting HASH AI worker"
    );

    if probe_broker(&config.task_queue.address(), DEFAULT_PROBE_TIMEOUT).await.is_err() {
        warn!("Continuing without the broker; activities are accepted over stdin");
    }

    let driver = build_driver(&config).await?;
    let registry = default_registry(driver, Some(usage_reporter(&config)));
    let worker = Worker::new(registry, config.inference.max_concurrent_activities);
    let worker_shutdown = worker.shutdown_token();

    let health_shutdown = CancellationToken::new();
    let mut health = tokio::spawn({
        let health_config = config.health.clone();
        let token = health_shutdown.clone();
        async move { hash_ai_health::serve(&health_config, token).await }
    });

    tokio::select! {
        signal = shutdown_signal() => {
            info!(signal, "Received shutdown signal, exiting");
            worker_shutdown.cancel();
            health_shutdown.cancel();
            std::process::exit(1);
        }
        joined = &mut health => {
            joined.context("Health server task failed")??;
            anyhow::bail!("Health server stopped unexpectedly");
        }
        served = stdio::serve(tokio::io::stdin(), tokio::io::stdout(), worker) => {
            served.context("Activity transport failed")?;
            info!("Activity input closed, stopping");
        }
    }

    health_shutdown.cancel();
    health.await.context("Health server task failed")??;
    Ok(())
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
