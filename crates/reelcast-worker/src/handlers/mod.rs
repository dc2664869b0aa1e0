//! Task handlers, one per task type.

mod video_handler;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use reelcast_core::models::Task;

use crate::state::WorkerState;

pub use video_handler::{pipeline_error_to_task_error, VideoTaskHandler};

#[async_trait]
pub trait TaskHandler {
    async fn process(&self, task: &Task, state: Arc<WorkerState>) -> Result<serde_json::Value>;
}
