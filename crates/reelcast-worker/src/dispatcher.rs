//! Dispatcher: turns a committed `uploaded` row into one `video_process` task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use reelcast_core::models::{
    Priority, ProcessVideoPayload, Task, TaskPayload, TaskType, Video, VideoStatus,
};

use crate::queue::TaskQueue;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("video {video_id} is not dispatchable in status {status}")]
    NotDispatchable { video_id: i64, status: VideoStatus },
    #[error("failed to enqueue video {video_id}: {error:#}")]
    Enqueue {
        video_id: i64,
        error: anyhow::Error,
    },
}

/// Anything that can durably accept a task.
#[async_trait]
pub trait TaskEnqueuer: Send + Sync {
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Uuid>;
}

#[async_trait]
impl TaskEnqueuer for TaskQueue {
    async fn enqueue(
        &self,
        task_type: TaskType,
        payload: serde_json::Value,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Uuid> {
        self.submit_task(task_type, payload, priority, scheduled_at)
            .await
    }
}

pub struct VideoDispatcher<E> {
    enqueuer: E,
}

impl<E: TaskEnqueuer> VideoDispatcher<E> {
    pub fn new(enqueuer: E) -> Self {
        Self { enqueuer }
    }

    /// Enqueue processing for a freshly uploaded video.
    ///
    /// The caller passes the row it committed. A failed enqueue is reported
    /// and the row is left as it is; the orphan can be re-enqueued later.
    pub async fn dispatch(&self, video: &Video) -> Result<Uuid, DispatchError> {
        if video.status != VideoStatus::Uploaded {
            return Err(DispatchError::NotDispatchable {
                video_id: video.id,
                status: video.status,
            });
        }
        self.enqueue(video).await
    }

    /// Enqueue processing for an `uploaded` or `failed` row, as operators do
    /// when recovering orphaned or dead-lettered videos.
    pub async fn redispatch(&self, video: &Video) -> Result<Uuid, DispatchError> {
        if !video.is_processable() {
            return Err(DispatchError::NotDispatchable {
                video_id: video.id,
                status: video.status,
            });
        }
        self.enqueue(video).await
    }

    async fn enqueue(&self, video: &Video) -> Result<Uuid, DispatchError> {
        let payload = ProcessVideoPayload::new(video.id).ok_or(DispatchError::NotDispatchable {
            video_id: video.id,
            status: video.status,
        })?;

        let task_id = self
            .enqueuer
            .enqueue(
                ProcessVideoPayload::task_type(),
                Task::payload_from(&payload),
                Priority::Normal,
                None,
            )
            .await
            .map_err(|error| {
                tracing::error!(video_id = video.id, error = %error, "Failed to enqueue video");
                DispatchError::Enqueue {
                    video_id: video.id,
                    error,
                }
            })?;

        tracing::info!(video_id = video.id, task_id = %task_id, "Video dispatched");
        Ok(task_id)
    }
}
