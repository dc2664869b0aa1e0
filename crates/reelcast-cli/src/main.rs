//! Reelcast admin CLI: queue inspection and recovery.
//!
//! Reads the same environment as the worker (DATABASE_URL and friends).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use reelcast_cli::{dead_letter_row, init_tracing};
use reelcast_core::models::TaskType;
use reelcast_core::{Config, VideoStore};
use reelcast_db::{TaskRepository, VideoRepository};
use reelcast_worker::{TaskQueue, TaskQueueConfig, VideoDispatcher};

#[derive(Parser)]
#[command(name = "reelcast", about = "Reelcast video queue administration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue processing for one uploaded or failed video
    Enqueue {
        /// Video id
        video_id: i64,
    },
    /// Enqueue every uploaded video that has no live task
    ReenqueueOrphans {
        /// Only list the videos that would be enqueued
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of videos to enqueue
        #[arg(long, default_value = "1000")]
        limit: i64,
    },
    /// List dead-lettered video tasks with their last error
    DeadLetters {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Reset a dead-lettered task to pending with a fresh retry budget
    Retry {
        /// Task UUID
        task_id: Uuid,
    },
    /// Task counts by status
    Stats,
    /// Delete completed, failed and cancelled tasks past retention
    Purge {
        #[arg(long)]
        older_than_days: i32,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = reelcast_db::connect(&config).await?;
    let tasks = TaskRepository::new(pool.clone());
    let videos = VideoRepository::new(pool.clone());
    let dispatcher = VideoDispatcher::new(TaskQueue::new_no_worker(
        tasks.clone(),
        TaskQueueConfig::from(&config.queue),
    ));

    match cli.command {
        Commands::Enqueue { video_id } => {
            let Some(video) = videos.find_video(video_id).await? else {
                bail!("video {} not found", video_id);
            };
            let task_id = dispatcher.redispatch(&video).await?;
            print_json(&serde_json::json!({ "video_id": video_id, "task_id": task_id }))?;
        }
        Commands::ReenqueueOrphans { dry_run, limit } => {
            let orphans = videos.find_orphaned_uploads(limit).await?;
            let mut enqueued = 0usize;
            let mut failed = 0usize;
            for video in &orphans {
                if dry_run {
                    println!("{}  {}  {}", video.id, video.uploaded_at, video.original_location);
                    continue;
                }
                match dispatcher.dispatch(video).await {
                    Ok(task_id) => {
                        enqueued += 1;
                        println!("{}  -> {}", video.id, task_id);
                    }
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}  error: {}", video.id, e);
                    }
                }
            }
            print_json(&serde_json::json!({
                "orphans": orphans.len(),
                "enqueued": enqueued,
                "failed": failed,
                "dry_run": dry_run,
            }))?;
            if failed > 0 {
                bail!("{} of {} orphans could not be enqueued", failed, orphans.len());
            }
        }
        Commands::DeadLetters { limit } => {
            let dead = tasks.list_dead_letters(TaskType::VideoProcess, limit).await?;
            if dead.is_empty() {
                println!("No dead-lettered tasks");
            }
            for task in &dead {
                println!("{}", dead_letter_row(task, 80));
            }
        }
        Commands::Retry { task_id } => {
            let task = tasks.retry_task(task_id).await?;
            print_json(&serde_json::json!({
                "task_id": task.id,
                "status": task.status,
                "max_retries": task.max_retries,
            }))?;
        }
        Commands::Stats => {
            let stats = tasks.get_stats().await?;
            print_json(&stats)?;
        }
        Commands::Purge { older_than_days } => {
            if older_than_days <= 0 {
                bail!("--older-than-days must be positive");
            }
            let deleted = tasks.delete_old_finished_tasks(older_than_days).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
    }

    pool.close().await;
    Ok(())
}
