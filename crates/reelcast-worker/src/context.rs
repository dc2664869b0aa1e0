//! Task handler context trait
//!
//! The worker state implements this trait. The queue calls `dispatch_task`
//! for every claimed task and `on_dead_letter` once a task is terminally
//! failed, so the owner of the task's subject can record the failure.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use reelcast_core::models::Task;

/// Context for task dispatch.
///
/// The queue holds a weak reference and upgrades it per task.
#[async_trait]
pub trait TaskHandlerContext: Send + Sync {
    /// Dispatch a task to the appropriate handler and return the result.
    async fn dispatch_task(self: Arc<Self>, task: &Task) -> Result<serde_json::Value>;

    /// Called after the task was marked `failed` for good: either its error
    /// was unrecoverable or its retry budget is spent.
    async fn on_dead_letter(self: Arc<Self>, task: &Task, reason: &str) -> Result<()> {
        let _ = (task, reason);
        Ok(())
    }
}
