//! TaskHandlerContext implementation for WorkerState.
//!
//! Dispatches tasks to the appropriate handler based on task type.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use reelcast_core::models::{Task, TaskType};

use crate::context::TaskHandlerContext;
use crate::handlers::{TaskHandler, VideoTaskHandler};
use crate::state::WorkerState;

#[async_trait]
impl TaskHandlerContext for WorkerState {
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value> {
        match task.task_type {
            TaskType::VideoProcess => {
                let handler = VideoTaskHandler;
                handler.process(task, self).await
            }
        }
    }

    async fn on_dead_letter(self: Arc<Self>, task: &Task, reason: &str) -> Result<()> {
        match task.task_type {
            TaskType::VideoProcess => VideoTaskHandler::record_failure(task, &self, reason).await,
        }
    }
}
