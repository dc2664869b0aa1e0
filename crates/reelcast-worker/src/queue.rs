//! Task queue: worker pool, LISTEN/NOTIFY or polling, retry, dead-lettering,
//! stale task reaping and retention cleanup.
//!
//! Delivery is at-least-once. A task is acknowledged (`completed`) only after
//! its handler returns `Ok`; recoverable failures are rescheduled with
//! exponential backoff until `max_retries`, after which the task is
//! dead-lettered and the context's `on_dead_letter` hook runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::sleep;
use uuid::Uuid;

use reelcast_core::constants::TASK_NOTIFY_CHANNEL;
use reelcast_core::models::{Priority, Task, TaskType};
use reelcast_core::{QueueSettings, TaskError};
use reelcast_db::TaskRepository;

use crate::context::TaskHandlerContext;

/// Maximum delay in seconds before retrying a failed task. Caps exponential backoff
/// so that high retry counts do not produce excessively long delays.
pub const MAX_RETRY_BACKOFF_SECS: u64 = 300;

const LISTENER_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const RETENTION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Computes backoff in seconds for a given retry count (exponential with cap).
#[inline]
pub fn compute_retry_backoff_seconds(retry_count: i32) -> u64 {
    let exp = u32::try_from(retry_count).unwrap_or(0).min(63);
    2_u64.saturating_pow(exp).min(MAX_RETRY_BACKOFF_SECS)
}

/// What the queue does with a task whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Retry { backoff_seconds: u64 },
    DeadLetter { exhausted: bool },
}

/// Retry while the error is recoverable and the budget allows, dead-letter otherwise.
pub fn decide_outcome(task: &Task, recoverable: bool) -> TaskOutcome {
    if !recoverable {
        TaskOutcome::DeadLetter { exhausted: false }
    } else if task.can_retry() {
        TaskOutcome::Retry {
            backoff_seconds: compute_retry_backoff_seconds(task.retry_count),
        }
    } else {
        TaskOutcome::DeadLetter { exhausted: true }
    }
}

/// Errors not wrapped in a [`TaskError`] are treated as recoverable.
fn is_recoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TaskError>()
        .map(|te| te.is_recoverable())
        .unwrap_or(true)
}

/// Full context chain of a handler error, as stored in the task result.
fn error_text(err: &anyhow::Error) -> String {
    match err.downcast_ref::<TaskError>() {
        // TaskError's Display already renders its whole chain
        Some(te) => te.to_string(),
        None => format!("{:#}", err),
    }
}

#[derive(Clone, Debug)]
pub struct TaskQueueConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
    /// Visibility timeout stamped on submitted tasks.
    pub default_timeout_seconds: i32,
    pub max_retries: i32,
    /// Interval in seconds between runs of the stale task reaper. 0 disables it.
    pub stale_task_reap_interval_secs: u64,
    /// Grace period in seconds added to task timeout before reaping stale running tasks.
    pub stale_task_grace_period_secs: i64,
    /// Finished tasks older than this are deleted. 0 disables cleanup.
    pub retention_days: i32,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for TaskQueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_workers: settings.max_workers,
            poll_interval_ms: settings.poll_interval_ms,
            default_timeout_seconds: settings.visibility_timeout_secs,
            max_retries: settings.max_retries,
            stale_task_reap_interval_secs: settings.stale_task_reap_interval_secs,
            stale_task_grace_period_secs: settings.stale_task_grace_period_secs,
            retention_days: settings.retention_days,
        }
    }
}

#[derive(Clone)]
pub struct TaskQueue {
    repository: TaskRepository,
    config: TaskQueueConfig,
    shutdown_tx: mpsc::Sender<()>,
    semaphore: Arc<Semaphore>,
}

impl TaskQueue {
    /// Create a new TaskQueue and spawn its worker pool.
    ///
    /// If `pool` is `Some`, the worker uses PostgreSQL LISTEN/NOTIFY to wake immediately
    /// when tasks are created, in addition to polling at `poll_interval_ms`.
    /// If `pool` is `None`, only polling is used.
    pub fn new(
        repository: TaskRepository,
        config: TaskQueueConfig,
        context: Weak<dyn TaskHandlerContext>,
        pool: Option<sqlx::PgPool>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let semaphore = Arc::new(Semaphore::new(config.max_workers));

        let repo_clone = repository.clone();
        let config_clone = config.clone();
        let semaphore_clone = semaphore.clone();

        tokio::spawn(async move {
            Self::worker_pool(
                repo_clone,
                config_clone,
                semaphore_clone,
                context,
                shutdown_rx,
                pool,
            )
            .await;
        });

        Self {
            repository,
            config,
            shutdown_tx,
            semaphore,
        }
    }

    /// Creates a TaskQueue that does not spawn a worker.
    ///
    /// Submitted tasks are written to the database and picked up by a running worker.
    pub fn new_no_worker(repository: TaskRepository, config: TaskQueueConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        drop(shutdown_rx);
        let semaphore = Arc::new(Semaphore::new(config.max_workers));
        Self {
            repository,
            config,
            shutdown_tx,
            semaphore,
        }
    }

    pub fn repository(&self) -> &TaskRepository {
        &self.repository
    }

    /// Submit a new task to the queue.
    #[tracing::instrument(skip(self, payload))]
    pub async fn submit_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        let task = self
            .repository
            .create_task(
                task_type.clone(),
                payload,
                priority.as_i32(),
                scheduled_at,
                self.config.max_retries,
                Some(self.config.default_timeout_seconds),
            )
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    task_type = %task_type,
                    priority = priority.as_i32(),
                    "Failed to create task in repository"
                );
                e
            })
            .context("Failed to create task in repository")?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task_type,
            priority = priority.as_i32(),
            "Task submitted to queue"
        );

        Ok(task.id)
    }

    async fn worker_pool(
        repository: TaskRepository,
        config: TaskQueueConfig,
        semaphore: Arc<Semaphore>,
        context: Weak<dyn TaskHandlerContext>,
        mut shutdown_rx: mpsc::Receiver<()>,
        pool: Option<sqlx::PgPool>,
    ) {
        let use_listen = pool.is_some();
        tracing::info!(
            max_workers = config.max_workers,
            poll_interval_ms = config.poll_interval_ms,
            listen_notify = use_listen,
            "Task queue worker pool started"
        );

        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        // Wakes the main loop when LISTEN receives a NOTIFY.
        let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
        let listener_handle = pool.map(|pool| {
            let tx = notify_tx.clone();
            tokio::spawn(async move {
                loop {
                    match sqlx::postgres::PgListener::connect_with(&pool).await {
                        Ok(mut listener) => {
                            if let Err(e) = listener.listen(TASK_NOTIFY_CHANNEL).await {
                                tracing::warn!(error = %e, "LISTEN failed, will retry");
                                sleep(LISTENER_RECONNECT_DELAY).await;
                                continue;
                            }
                            while listener.recv().await.is_ok() {
                                let _ = tx.try_send(());
                            }
                            tracing::warn!("LISTEN connection lost, reconnecting");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "PgListener connect failed, will retry");
                            sleep(LISTENER_RECONNECT_DELAY).await;
                        }
                    }
                }
            })
        });

        let (maintenance_shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

        if config.stale_task_reap_interval_secs > 0 {
            let repo_for_reaper = repository.clone();
            let ctx = context.clone();
            let reap_interval = Duration::from_secs(config.stale_task_reap_interval_secs);
            let grace_period = config.stale_task_grace_period_secs;
            let mut stop = maintenance_shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(reap_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            match repo_for_reaper.reap_stale_running_tasks(grace_period).await {
                                Ok(dead) => {
                                    for task in dead {
                                        Self::notify_dead_letter(&ctx, &task, "visibility timeout exceeded after final retry").await;
                                    }
                                }
                                Err(e) => tracing::error!(error = %e, "Stale task reaper failed"),
                            }
                        }
                        _ = stop.recv() => break,
                    }
                }
            });
        }

        if config.retention_days > 0 {
            let repo_for_cleanup = repository.clone();
            let retention_days = config.retention_days;
            let mut stop = maintenance_shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(RETENTION_CLEANUP_INTERVAL);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Err(e) = repo_for_cleanup.delete_old_finished_tasks(retention_days).await {
                                tracing::error!(error = %e, "Task retention cleanup failed");
                            }
                        }
                        _ = stop.recv() => break,
                    }
                }
            });
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Task queue worker pool shutting down");
                    let _ = maintenance_shutdown_tx.send(());
                    if let Some(handle) = listener_handle {
                        handle.abort();
                    }
                    break;
                }
                _ = notify_rx.recv() => {
                    Self::claim_and_dispatch_one(&repository, &semaphore, &context).await;
                }
                _ = sleep(poll_interval) => {
                    Self::claim_and_dispatch_one(&repository, &semaphore, &context).await;
                }
            }
        }

        tracing::info!("Task queue worker pool stopped");
    }

    async fn claim_and_dispatch_one(
        repository: &TaskRepository,
        semaphore: &Arc<Semaphore>,
        context: &Weak<dyn TaskHandlerContext>,
    ) {
        let permit = match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("No workers available, skipping claim");
                return;
            }
        };

        match repository.claim_next_task().await {
            Ok(Some(task)) => {
                let repo = repository.clone();
                let ctx = context.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = Self::process_task(task, repo, ctx).await {
                        tracing::error!(error = %e, "Task processing failed");
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                tracing::trace!("No tasks available in queue");
            }
            Err(e) => {
                drop(permit);
                tracing::error!(error = %e, "Failed to claim task from queue");
            }
        }
    }

    #[tracing::instrument(skip(repository, context), fields(task.id = %task.id, task.type = %task.task_type))]
    async fn process_task(
        task: Task,
        repository: TaskRepository,
        context: Weak<dyn TaskHandlerContext>,
    ) -> Result<()> {
        let ctx = context.upgrade().ok_or_else(|| {
            anyhow::anyhow!("TaskHandlerContext was dropped, cannot process task")
        })?;

        let timeout_duration = task
            .timeout_seconds
            .and_then(|s| u64::try_from(s).ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        let started = std::time::Instant::now();
        let result = tokio::time::timeout(timeout_duration, ctx.clone().dispatch_task(&task)).await;

        let err = match result {
            Ok(Ok(task_result)) => {
                let acked = repository
                    .mark_completed(&task, task_result)
                    .await
                    .context("Failed to mark task as completed")?;
                if acked.is_none() {
                    return Ok(());
                }
                tracing::info!(
                    task_id = %task.id,
                    task_type = %task.task_type,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Task completed successfully"
                );
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => {
                tracing::error!(
                    task_id = %task.id,
                    timeout_seconds = ?task.timeout_seconds,
                    "Task execution timed out"
                );
                anyhow::anyhow!(
                    "task execution timed out after {}s",
                    timeout_duration.as_secs()
                )
            }
        };

        let recoverable = is_recoverable(&err);
        let error_text = error_text(&err);
        tracing::error!(
            task_id = %task.id,
            error = %error_text,
            retry_count = task.retry_count,
            max_retries = task.max_retries,
            unrecoverable = !recoverable,
            "Task execution failed"
        );

        match decide_outcome(&task, recoverable) {
            TaskOutcome::Retry { backoff_seconds } => {
                tracing::info!(
                    task_id = %task.id,
                    retry_count = task.retry_count + 1,
                    backoff_seconds = backoff_seconds,
                    "Scheduling task retry"
                );
                repository
                    .schedule_retry(
                        &task,
                        backoff_seconds,
                        json!({
                            "error": error_text,
                            "retry_count": task.retry_count,
                        }),
                    )
                    .await
                    .context("Failed to schedule task retry")?;
                Ok(())
            }
            TaskOutcome::DeadLetter { exhausted } => {
                let reason = if exhausted {
                    "Task failed after maximum retries"
                } else {
                    "Task failed with unrecoverable error"
                };
                let error_result = json!({
                    "error": error_text,
                    "retry_count": task.retry_count,
                    "unrecoverable": !recoverable,
                    "reason": reason,
                });
                let acked = repository
                    .mark_failed(&task, error_result)
                    .await
                    .context("Failed to mark task as failed")?;
                if acked.is_none() {
                    // Another execution owns the task now; its outcome decides the video.
                    return Ok(());
                }
                tracing::error!(task_id = %task.id, exhausted, "{}", reason);

                if let Err(e) = ctx.on_dead_letter(&task, &error_text).await {
                    tracing::error!(task_id = %task.id, error = %e, "Dead-letter hook failed");
                }
                Err(err)
            }
        }
    }

    async fn notify_dead_letter(context: &Weak<dyn TaskHandlerContext>, task: &Task, reason: &str) {
        let Some(ctx) = context.upgrade() else {
            tracing::warn!(task_id = %task.id, "No handler context for dead-lettered task");
            return;
        };
        if let Err(e) = ctx.on_dead_letter(task, reason).await {
            tracing::error!(task_id = %task.id, error = %e, "Dead-letter hook failed");
        }
    }

    /// Stop claiming new tasks, then wait up to `drain` for in-flight tasks.
    ///
    /// Returns `true` when every worker slot was released in time. Tasks still
    /// running past the drain period stay `running` and are redelivered by
    /// the stale task reaper of a later worker.
    pub async fn shutdown(&self, drain: Duration) -> bool {
        tracing::info!("Initiating task queue shutdown");
        let _ = self.shutdown_tx.send(()).await;

        let slots = u32::try_from(self.config.max_workers).unwrap_or(u32::MAX);
        match tokio::time::timeout(drain, self.semaphore.acquire_many(slots)).await {
            Ok(Ok(_all)) => {
                tracing::info!("All in-flight tasks finished");
                true
            }
            _ => {
                tracing::warn!(
                    drain_secs = drain.as_secs(),
                    in_flight = self.config.max_workers - self.semaphore.available_permits(),
                    "In-flight tasks did not finish within drain period"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcast_core::models::{ProcessVideoPayload, TaskStatus};
    use reelcast_processing::test_helpers::{
        uploaded_video, FakeTranscoder, MockStorage, MockVideoStore,
    };
    use reelcast_processing::VideoPipeline;
    use reelcast_storage::RemoteFetcher;

    use crate::WorkerState;

    fn task(retry_count: i32, max_retries: i32) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            task_type: TaskType::VideoProcess,
            status: TaskStatus::Running,
            priority: Priority::Normal.as_i32(),
            payload: Task::payload_from(&ProcessVideoPayload { video_id: 1 }),
            result: None,
            scheduled_at: now,
            started_at: Some(now),
            completed_at: None,
            retry_count,
            max_retries,
            timeout_seconds: Some(900),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        assert_eq!(compute_retry_backoff_seconds(0), 1);
        assert_eq!(compute_retry_backoff_seconds(1), 2);
        assert_eq!(compute_retry_backoff_seconds(2), 4);
        assert_eq!(compute_retry_backoff_seconds(8), 256);
        assert_eq!(compute_retry_backoff_seconds(9), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(100), MAX_RETRY_BACKOFF_SECS);
        assert_eq!(compute_retry_backoff_seconds(-1), 1);
    }

    #[test]
    fn recoverable_errors_retry_until_budget_spent() {
        assert_eq!(
            decide_outcome(&task(0, 3), true),
            TaskOutcome::Retry { backoff_seconds: 1 }
        );
        assert_eq!(
            decide_outcome(&task(2, 3), true),
            TaskOutcome::Retry { backoff_seconds: 4 }
        );
        assert_eq!(
            decide_outcome(&task(3, 3), true),
            TaskOutcome::DeadLetter { exhausted: true }
        );
    }

    #[test]
    fn unrecoverable_errors_skip_retries() {
        assert_eq!(
            decide_outcome(&task(0, 3), false),
            TaskOutcome::DeadLetter { exhausted: false }
        );
    }

    #[test]
    fn unrecoverable_task_error_detected() {
        let err: anyhow::Error = TaskError::unrecoverable(anyhow::anyhow!("bad payload")).into();
        assert!(!is_recoverable(&err));
    }

    #[test]
    fn recoverable_task_error_detected() {
        let err: anyhow::Error = TaskError::recoverable(anyhow::anyhow!("network")).into();
        assert!(is_recoverable(&err));
    }

    #[test]
    fn non_task_error_treated_as_recoverable() {
        let err: anyhow::Error = anyhow::anyhow!("generic error");
        assert!(is_recoverable(&err));
    }

    #[test]
    fn error_text_keeps_context_chain() {
        let err: anyhow::Error = TaskError::recoverable(
            anyhow::anyhow!("connection refused").context("download"),
        )
        .into();
        assert_eq!(error_text(&err), "download: connection refused");

        let plain = anyhow::anyhow!("disk full").context("upload");
        assert_eq!(error_text(&plain), "upload: disk full");
    }

    fn context(videos: &MockVideoStore, work_root: &std::path::Path) -> Arc<dyn TaskHandlerContext> {
        let pipeline = VideoPipeline::new(
            Arc::new(videos.clone()),
            Arc::new(MockStorage::new()),
            RemoteFetcher::new(Duration::from_secs(5)).unwrap(),
            Arc::new(FakeTranscoder::new()),
            work_root.to_path_buf(),
        );
        Arc::new(WorkerState::new(pipeline))
    }

    #[ignore]
    #[sqlx::test(migrator = "reelcast_db::MIGRATOR")]
    async fn malformed_payloads_are_queued_then_dead_lettered(pool: sqlx::PgPool) {
        let tmp = tempfile::tempdir().unwrap();
        let videos = MockVideoStore::new();
        let ctx = context(&videos, tmp.path());
        let queue = TaskQueue::new_no_worker(TaskRepository::new(pool), TaskQueueConfig::default());
        let repo = queue.repository().clone();

        for payload in [json!({ "video_id": "not-a-number" }), json!({ "video_id": u64::MAX })] {
            let id = queue
                .submit_task(TaskType::VideoProcess, payload, Priority::Normal, None)
                .await
                .unwrap();
            let claimed = repo.claim_next_task().await.unwrap().unwrap();
            assert_eq!(claimed.id, id);

            let result = TaskQueue::process_task(claimed, repo.clone(), Arc::downgrade(&ctx)).await;
            assert!(result.is_err());

            let stored = repo.get_task(id).await.unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Failed);
            assert_eq!(stored.retry_count, 0);
            let details = stored.result.unwrap();
            assert_eq!(details["unrecoverable"], true);
        }
        assert_eq!(videos.calls(), 0);
    }

    #[ignore]
    #[sqlx::test(migrator = "reelcast_db::MIGRATOR")]
    async fn late_result_of_a_redelivered_task_is_dropped(pool: sqlx::PgPool) {
        let tmp = tempfile::tempdir().unwrap();
        let videos = MockVideoStore::new();
        videos.insert(uploaded_video(5, "http://store/missing.mp4"));
        let ctx = context(&videos, tmp.path());
        let repo = TaskRepository::new(pool.clone());
        let queue = TaskQueue::new_no_worker(repo.clone(), TaskQueueConfig::default());

        let id = queue
            .submit_task(
                TaskType::VideoProcess,
                json!({ "video_id": 5 }),
                Priority::Normal,
                None,
            )
            .await
            .unwrap();
        let stale = repo.claim_next_task().await.unwrap().unwrap();
        sqlx::query("UPDATE tasks SET started_at = NOW() - interval '1 day' WHERE id = $1")
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
        repo.reap_stale_running_tasks(0).await.unwrap();
        let current = repo.claim_next_task().await.unwrap().unwrap();

        // The superseded execution fails its download; its retry must not land.
        TaskQueue::process_task(stale, repo.clone(), Arc::downgrade(&ctx))
            .await
            .unwrap();
        let stored = repo.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.started_at, current.started_at);

        assert!(repo
            .mark_completed(&current, json!({ "status": "processed" }))
            .await
            .unwrap()
            .is_some());
    }

    #[test]
    fn config_follows_queue_settings() {
        let config = TaskQueueConfig::default();
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.default_timeout_seconds, 900);
    }
}
