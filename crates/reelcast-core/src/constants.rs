/// Task type tag for the video processing task.
pub const VIDEO_PROCESS_TASK: &str = "video_process";

/// Postgres channel notified whenever a task row is inserted.
pub const TASK_NOTIFY_CHANNEL: &str = "reelcast_new_task";

/// Storage prefix for processed clips.
pub const PROCESSED_PREFIX: &str = "processed";

/// Default number of concurrent worker slots.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 5;
