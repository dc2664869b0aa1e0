//! `reelcast-worker`: claims `video_process` tasks and runs the pipeline.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use reelcast_core::Config;
use reelcast_db::{TaskRepository, VideoRepository};
use reelcast_infra::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use reelcast_processing::{sweep_stale, BroadcastProfile, FfmpegTranscoder, VideoPipeline};
use reelcast_storage::{create_storage, RemoteFetcher};
use reelcast_worker::{TaskHandlerContext, TaskQueue, TaskQueueConfig, WorkerState};

/// How long in-flight tasks may keep running after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_telemetry(TelemetryConfig::from_config("reelcast-worker", &config))?;

    tracing::info!(
        environment = %config.environment,
        storage_backend = %config.storage.backend,
        max_workers = config.queue.max_workers,
        work_dir = %config.work_dir.display(),
        "Starting reelcast worker"
    );

    let pool = reelcast_db::connect(&config).await?;

    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialize storage")?;
    let fetcher = RemoteFetcher::new(Duration::from_secs(config.download_timeout_secs))
        .context("Failed to build HTTP client")?;
    let transcoder = FfmpegTranscoder::new(config.ffmpeg_path.clone(), BroadcastProfile::STANDARD)
        .context("Invalid FFMPEG_PATH")?;

    // Areas older than a task's whole visibility window belong to dead executions
    let stale_after = Duration::from_secs(
        u64::try_from(config.queue.visibility_timeout_secs).unwrap_or(0)
            + u64::try_from(config.queue.stale_task_grace_period_secs).unwrap_or(0),
    );
    match sweep_stale(&config.work_dir, stale_after).await {
        Ok(removed) => tracing::debug!(removed, "Work dir sweep finished"),
        Err(e) => tracing::warn!(error = %e, "Failed to sweep work dir"),
    }

    let videos = Arc::new(VideoRepository::new(pool.clone()));
    let pipeline = VideoPipeline::new(
        videos,
        storage,
        fetcher,
        Arc::new(transcoder),
        config.work_dir.clone(),
    );

    let state = Arc::new(WorkerState::new(pipeline));
    let context: Arc<dyn TaskHandlerContext> = state.clone();

    let queue = TaskQueue::new(
        TaskRepository::new(pool.clone()),
        TaskQueueConfig::from(&config.queue),
        Arc::downgrade(&context),
        Some(pool.clone()),
    );

    shutdown_signal().await?;

    let drained = queue.shutdown(SHUTDOWN_DRAIN).await;
    drop(context);
    drop(state);
    pool.close().await;
    tracing::info!(drained, "Reelcast worker stopped");
    shutdown_telemetry().await;

    Ok(())
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
        signal.recv().await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        res = ctrl_c => {
            res?;
            tracing::info!("Received Ctrl+C signal");
        },
        res = terminate => {
            res?;
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}
