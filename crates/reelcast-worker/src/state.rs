//! Long-lived worker state shared by every worker slot.

use std::sync::Arc;

use reelcast_core::VideoStore;
use reelcast_processing::VideoPipeline;

/// Handles built once at start-up and passed to each task.
pub struct WorkerState {
    pipeline: VideoPipeline,
}

impl WorkerState {
    pub fn new(pipeline: VideoPipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &VideoPipeline {
        &self.pipeline
    }

    pub fn videos(&self) -> &Arc<dyn VideoStore> {
        self.pipeline.videos()
    }
}
