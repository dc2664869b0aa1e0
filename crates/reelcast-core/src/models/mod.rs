pub mod task;
pub mod video;

pub use task::{
    Priority, ProcessVideoPayload, Task, TaskPayload, TaskStats, TaskStatus, TaskType,
};
pub use video::{InvariantViolation, Video, VideoStatus};
