use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres};

use reelcast_core::constants::VIDEO_PROCESS_TASK;
use reelcast_core::models::{Video, VideoStatus};
use reelcast_core::VideoStore;

/// Postgres access to the `videos` table.
#[derive(Clone)]
pub struct VideoRepository {
    pool: PgPool,
}

impl VideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `uploaded` videos with no pending, scheduled or running task, oldest first.
    ///
    /// These are rows whose enqueue failed after the upload committed.
    #[tracing::instrument(skip(self))]
    pub async fn find_orphaned_uploads(&self, limit: i64) -> Result<Vec<Video>> {
        let videos = sqlx::query_as::<Postgres, Video>(
            r#"
            SELECT v.id, v.user_id, v.title, v.original_url, v.processed_url,
                   v.status, v.failure_reason, v.uploaded_at, v.processed_at
            FROM videos v
            WHERE v.status = 'uploaded'
                AND NOT EXISTS (
                    SELECT 1 FROM tasks t
                    WHERE t.task_type = $1
                        AND t.payload->>'video_id' = v.id::text
                        AND t.status IN ('pending', 'scheduled', 'running')
                )
            ORDER BY v.uploaded_at ASC
            LIMIT $2
            "#,
        )
        .bind(VIDEO_PROCESS_TASK)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to find orphaned uploads")?;

        Ok(videos)
    }
}

#[async_trait]
impl VideoStore for VideoRepository {
    #[tracing::instrument(skip(self))]
    async fn find_video(&self, id: i64) -> Result<Option<Video>> {
        let video = sqlx::query_as::<Postgres, Video>(
            r#"
            SELECT id, user_id, title, original_url, processed_url,
                   status, failure_reason, uploaded_at, processed_at
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to fetch video {}", id))?;

        Ok(video)
    }

    /// One statement, so the processed triple is written whole or not at all.
    #[tracing::instrument(skip(self, video), fields(video_id = video.id))]
    async fn save_processed(&self, video: &Video) -> Result<()> {
        if video.status != VideoStatus::Processed {
            anyhow::bail!("video {} is not in processed state", video.id);
        }
        video.check_invariants()?;

        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = 'processed',
                processed_url = $2,
                processed_at = $3,
                failure_reason = NULL
            WHERE id = $1
            "#,
        )
        .bind(video.id)
        .bind(video.processed_location.as_deref())
        .bind(video.processed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update video {}", video.id))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("video {} disappeared before update", video.id);
        }

        tracing::info!(
            video_id = video.id,
            processed_location = ?video.processed_location,
            "Video marked processed"
        );

        Ok(())
    }

    #[tracing::instrument(skip(self, reason))]
    async fn mark_failed(&self, id: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET status = 'failed',
                failure_reason = $2
            WHERE id = $1
                AND status <> 'processed'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to mark video {} as failed", id))?;

        let changed = result.rows_affected() > 0;
        if changed {
            tracing::warn!(video_id = id, reason = %reason, "Video marked failed");
        }
        Ok(changed)
    }
}
