use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use reelcast_core::models::{ProcessVideoPayload, Task};
use reelcast_core::TaskError;
use reelcast_processing::PipelineError;

use super::TaskHandler;
use crate::state::WorkerState;

pub struct VideoTaskHandler;

/// Permanent pipeline errors skip the retry budget; the rest are retried.
/// The stage name is kept as the outermost context.
pub fn pipeline_error_to_task_error(err: PipelineError) -> TaskError {
    let transient = err.is_transient();
    let stage = err.stage();
    let err = anyhow::Error::new(err).context(stage);
    if transient {
        TaskError::recoverable(err)
    } else {
        TaskError::unrecoverable(err)
    }
}

impl VideoTaskHandler {
    /// Record the terminal failure on the video row. Payloads that never
    /// decoded have no row to update.
    pub async fn record_failure(task: &Task, state: &WorkerState, reason: &str) -> Result<()> {
        let Some(video_id) = task
            .try_payload_as::<ProcessVideoPayload>()
            .ok()
            .and_then(|p| p.record_id())
        else {
            tracing::warn!(task_id = %task.id, "Dead-lettered task has no decodable video id");
            return Ok(());
        };

        let changed = state.videos().mark_failed(video_id, reason).await?;
        if !changed {
            tracing::info!(
                task_id = %task.id,
                video_id,
                "Video left unchanged by dead letter (already processed or missing)"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for VideoTaskHandler {
    #[tracing::instrument(skip(self, task, state), fields(task.id = %task.id, video.id = tracing::field::Empty))]
    async fn process(&self, task: &Task, state: Arc<WorkerState>) -> Result<serde_json::Value> {
        if let Ok(payload) = task.try_payload_as::<ProcessVideoPayload>() {
            tracing::Span::current().record("video.id", payload.video_id);
        }

        tracing::info!(
            retry_count = task.retry_count,
            "Processing video task"
        );

        let processed = state
            .pipeline()
            .run(&task.payload)
            .await
            .map_err(|e| {
                tracing::warn!(stage = e.stage(), transient = e.is_transient(), error = %e, "Video pipeline failed");
                pipeline_error_to_task_error(e)
            })?;

        Ok(json!({
            "status": "success",
            "video_id": processed.video_id,
            "processed_location": processed.location,
            "processed_at": processed.processed_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelcast_storage::StorageError;

    #[test]
    fn malformed_payload_is_unrecoverable() {
        let err = pipeline_error_to_task_error(PipelineError::MalformedPayload(
            "invalid type: string".to_string(),
        ));
        assert!(!err.is_recoverable());
        assert!(err.to_string().starts_with("decode: malformed payload"));
    }

    #[test]
    fn stage_errors_are_recoverable_with_stage_context() {
        let err = pipeline_error_to_task_error(PipelineError::Download {
            location: "a.mp4".to_string(),
            error: StorageError::NotFound("a.mp4".to_string()),
        });
        assert!(err.is_recoverable());
        assert!(err.to_string().starts_with("download: download of a.mp4 failed"));
    }
}
