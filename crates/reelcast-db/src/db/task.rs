use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use reelcast_core::constants::TASK_NOTIFY_CHANNEL;
use reelcast_core::models::{Task, TaskStats, TaskStatus, TaskType};

macro_rules! task_columns {
    () => {
        r#"
            id,
            task_type,
            status,
            priority,
            payload,
            result,
            scheduled_at,
            started_at,
            completed_at,
            retry_count,
            max_retries,
            timeout_seconds,
            created_at,
            updated_at
        "#
    };
}

#[derive(Clone)]
pub struct TaskRepository {
    pool: PgPool,
}

impl TaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a task and notify listening workers in the same transaction.
    #[tracing::instrument(skip(self, payload))]
    pub async fn create_task(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        priority: i32,
        scheduled_at: Option<DateTime<Utc>>,
        max_retries: i32,
        timeout_seconds: Option<i32>,
    ) -> Result<Task> {
        let scheduled_at = scheduled_at.unwrap_or_else(Utc::now);
        let status = if scheduled_at > Utc::now() {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for task creation")?;

        let task: Task = sqlx::query_as::<Postgres, Task>(concat!(
            r#"
            INSERT INTO tasks (
                task_type, status, priority, payload, scheduled_at,
                max_retries, timeout_seconds
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
            "#,
            task_columns!()
        ))
        .bind(task_type.to_string())
        .bind(status)
        .bind(priority)
        .bind(payload)
        .bind(scheduled_at)
        .bind(max_retries)
        .bind(timeout_seconds)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, task_type = %task_type, "Failed to insert task into database");
            anyhow::anyhow!("Failed to insert task into database: {}", e)
        })?;

        // Non-fatal: workers still find the row by polling.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(TASK_NOTIFY_CHANNEL)
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                task_id = %task.id,
                "Failed to send pg_notify for new task, workers will discover task via polling"
            );
        }

        tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, task_id = %task.id, "Failed to commit transaction for task creation");
            anyhow::anyhow!("Failed to commit transaction: {}", e)
        })?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task_type,
            priority = priority,
            "Task created"
        );

        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_task(&self, task_id: Uuid) -> Result<Option<Task>> {
        let task = sqlx::query_as::<Postgres, Task>(concat!(
            "SELECT",
            task_columns!(),
            "FROM tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch task")?;

        Ok(task)
    }

    /// Atomically claim the next due task and mark it running.
    ///
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent claimers off the same row.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next_task(&self) -> Result<Option<Task>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let task: Option<Task> = sqlx::query_as::<Postgres, Task>(concat!(
            "SELECT",
            task_columns!(),
            r#"
            FROM tasks
            WHERE status IN ('pending', 'scheduled')
                AND scheduled_at <= NOW()
            ORDER BY priority DESC, scheduled_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch next task")?;

        let Some(task) = task else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let claimed: Task = sqlx::query_as::<Postgres, Task>(concat!(
            r#"
            UPDATE tasks
            SET status = 'running',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
            "#,
            task_columns!()
        ))
        .bind(task.id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to update task status")?;

        tx.commit().await.context("Failed to commit transaction")?;

        tracing::debug!(
            task_id = %claimed.id,
            task_type = %claimed.task_type,
            retry_count = claimed.retry_count,
            "Task claimed"
        );

        Ok(Some(claimed))
    }

    /// Acknowledge the execution that claimed `claimed`.
    ///
    /// Every acknowledgement below only applies while the row is still
    /// `running` under the same claim (`started_at`). `None` means the lease
    /// was lost: the reaper redelivered or dead-lettered the task meanwhile.
    #[tracing::instrument(skip(self, claimed, result), fields(task_id = %claimed.id))]
    pub async fn mark_completed(
        &self,
        claimed: &Task,
        result: serde_json::Value,
    ) -> Result<Option<Task>> {
        let task: Option<Task> = sqlx::query_as::<Postgres, Task>(concat!(
            r#"
            UPDATE tasks
            SET status = 'completed',
                result = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
                AND status = 'running'
                AND started_at IS NOT DISTINCT FROM $2
            RETURNING
            "#,
            task_columns!()
        ))
        .bind(claimed.id)
        .bind(claimed.started_at)
        .bind(result)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to mark task as completed")?;

        match &task {
            Some(task) => {
                tracing::info!(task_id = %task.id, task_type = %task.task_type, "Task completed")
            }
            None => lease_lost(claimed, "completed"),
        }

        Ok(task)
    }

    /// Dead-letter a task with the error details in `result`.
    #[tracing::instrument(skip(self, claimed, error), fields(task_id = %claimed.id))]
    pub async fn mark_failed(
        &self,
        claimed: &Task,
        error: serde_json::Value,
    ) -> Result<Option<Task>> {
        let task: Option<Task> = sqlx::query_as::<Postgres, Task>(concat!(
            r#"
            UPDATE tasks
            SET status = 'failed',
                result = $3,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
                AND status = 'running'
                AND started_at IS NOT DISTINCT FROM $2
            RETURNING
            "#,
            task_columns!()
        ))
        .bind(claimed.id)
        .bind(claimed.started_at)
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to mark task as failed")?;

        match &task {
            Some(task) => tracing::error!(
                task_id = %task.id,
                task_type = %task.task_type,
                retry_count = task.retry_count,
                "Task failed"
            ),
            None => lease_lost(claimed, "failed"),
        }

        Ok(task)
    }

    /// Consume one retry and make the task due again after `backoff_seconds`.
    /// The last error is kept in `result` for operators.
    #[tracing::instrument(skip(self, claimed, last_error), fields(task_id = %claimed.id))]
    pub async fn schedule_retry(
        &self,
        claimed: &Task,
        backoff_seconds: u64,
        last_error: serde_json::Value,
    ) -> Result<Option<Task>> {
        let backoff = i64::try_from(backoff_seconds).unwrap_or(i64::MAX);
        let task: Option<Task> = sqlx::query_as::<Postgres, Task>(concat!(
            r#"
            UPDATE tasks
            SET status = 'scheduled',
                retry_count = retry_count + 1,
                started_at = NULL,
                scheduled_at = NOW() + ($2 * interval '1 second'),
                result = $3,
                updated_at = NOW()
            WHERE id = $1
                AND status = 'running'
                AND started_at IS NOT DISTINCT FROM $4
            RETURNING
            "#,
            task_columns!()
        ))
        .bind(claimed.id)
        .bind(backoff)
        .bind(last_error)
        .bind(claimed.started_at)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to schedule task retry")?;

        match &task {
            Some(task) => tracing::info!(
                task_id = %task.id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                backoff_seconds = backoff_seconds,
                "Task retry scheduled"
            ),
            None => lease_lost(claimed, "scheduled for retry"),
        }

        Ok(task)
    }

    /// Return expired `running` tasks to the queue.
    ///
    /// A task is expired once `started_at + timeout_seconds + grace` has passed.
    /// Tasks with retries left go back to `pending` (consuming one retry);
    /// the rest are dead-lettered. Returns the dead-lettered tasks so the
    /// caller can run its terminal handling for them.
    #[tracing::instrument(skip(self))]
    pub async fn reap_stale_running_tasks(&self, grace_period_secs: i64) -> Result<Vec<Task>> {
        let reaped: Vec<Task> = sqlx::query_as::<Postgres, Task>(concat!(
            r#"
            UPDATE tasks
            SET status = (CASE WHEN retry_count < max_retries
                               THEN 'pending' ELSE 'failed' END)::task_status,
                retry_count = CASE WHEN retry_count < max_retries
                                   THEN retry_count + 1 ELSE retry_count END,
                completed_at = CASE WHEN retry_count < max_retries
                                    THEN NULL ELSE NOW() END,
                result = jsonb_build_object(
                    'error', 'visibility timeout exceeded',
                    'retry_count', retry_count,
                    'timeout_seconds', timeout_seconds
                ),
                started_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
                AND started_at < NOW()
                    - ((COALESCE(timeout_seconds, 3600) + $1) * interval '1 second')
            RETURNING
            "#,
            task_columns!()
        ))
        .bind(grace_period_secs)
        .fetch_all(&self.pool)
        .await
        .context("Failed to reap stale running tasks")?;

        if reaped.is_empty() {
            return Ok(reaped);
        }

        let (dead, requeued): (Vec<Task>, Vec<Task>) = reaped
            .into_iter()
            .partition(|t| t.status == TaskStatus::Failed);

        tracing::warn!(
            requeued = requeued.len(),
            dead_lettered = dead.len(),
            "Reaped stale running tasks"
        );

        Ok(dead)
    }

    /// Reset a dead-lettered task to `pending` with a fresh retry budget.
    #[tracing::instrument(skip(self))]
    pub async fn retry_task(&self, task_id: Uuid) -> Result<Task> {
        let task: Task = sqlx::query_as::<Postgres, Task>(concat!(
            r#"
            UPDATE tasks
            SET status = 'pending',
                retry_count = 0,
                started_at = NULL,
                completed_at = NULL,
                scheduled_at = NOW(),
                result = NULL,
                updated_at = NOW()
            WHERE id = $1
                AND status = 'failed'
            RETURNING
            "#,
            task_columns!()
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to retry task")?
        .ok_or_else(|| anyhow::anyhow!("Task {} not found or not in failed state", task_id))?;

        if let Err(e) = sqlx::query("SELECT pg_notify($1, '')")
            .bind(TASK_NOTIFY_CHANNEL)
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, task_id = %task_id, "Failed to send pg_notify for retried task");
        }

        tracing::info!(task_id = %task_id, "Task manually retried");

        Ok(task)
    }

    /// Most recently dead-lettered tasks of `task_type`.
    #[tracing::instrument(skip(self))]
    pub async fn list_dead_letters(&self, task_type: TaskType, limit: i64) -> Result<Vec<Task>> {
        let tasks = sqlx::query_as::<Postgres, Task>(concat!(
            "SELECT",
            task_columns!(),
            r#"
            FROM tasks
            WHERE status = 'failed' AND task_type = $1
            ORDER BY completed_at DESC NULLS LAST
            LIMIT $2
            "#
        ))
        .bind(task_type.to_string())
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list dead-lettered tasks")?;

        Ok(tasks)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<TaskStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'running') as running,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed,
                COUNT(*) FILTER (WHERE status = 'scheduled') as scheduled,
                COUNT(*) FILTER (WHERE status = 'cancelled') as cancelled
            FROM tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch task stats")?;

        Ok(TaskStats {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            pending: row.get::<Option<i64>, _>("pending").unwrap_or(0),
            running: row.get::<Option<i64>, _>("running").unwrap_or(0),
            completed: row.get::<Option<i64>, _>("completed").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
            scheduled: row.get::<Option<i64>, _>("scheduled").unwrap_or(0),
            cancelled: row.get::<Option<i64>, _>("cancelled").unwrap_or(0),
        })
    }

    /// Delete finished tasks (completed, failed, cancelled) older than the given number of days.
    /// Returns the number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_old_finished_tasks(&self, older_than_days: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            WITH deleted AS (
                DELETE FROM tasks
                WHERE status IN ('completed', 'failed', 'cancelled')
                    AND COALESCE(completed_at, updated_at) < NOW() - ($1 * interval '1 day')
                RETURNING id
            )
            SELECT COUNT(*)::bigint FROM deleted
            "#,
        )
        .bind(older_than_days)
        .fetch_one(&self.pool)
        .await
        .context("Failed to delete old finished tasks")?;

        let count: i64 = result.get(0);
        let count = count.max(0) as u64;

        if count > 0 {
            tracing::info!(
                count = count,
                older_than_days = older_than_days,
                "Deleted old finished tasks"
            );
        }

        Ok(count)
    }
}

fn lease_lost(claimed: &Task, outcome: &str) {
    tracing::warn!(
        task_id = %claimed.id,
        started_at = ?claimed.started_at,
        "Task lease lost, not marking it {}",
        outcome
    );
}
