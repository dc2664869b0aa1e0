//! Reelcast Worker – background task queue and video task handling.
//!
//! The queue claims `video_process` tasks from Postgres, runs them on a fixed
//! pool, and owns retry, backoff and dead-lettering. [`WorkerState`] holds the
//! pipeline built at start-up and dispatches claimed tasks to their handler.

mod context;
pub mod dispatcher;
pub mod handlers;
mod queue;
mod state;
mod task_dispatch;

pub use context::TaskHandlerContext;
pub use dispatcher::{DispatchError, TaskEnqueuer, VideoDispatcher};
pub use queue::{
    compute_retry_backoff_seconds, decide_outcome, TaskOutcome, TaskQueue, TaskQueueConfig,
    MAX_RETRY_BACKOFF_SECS,
};
pub use state::WorkerState;
