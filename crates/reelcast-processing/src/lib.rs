//! Reelcast Processing Library
//!
//! The per-task video pipeline: resolve the record, fetch the original into a
//! private work area, render the broadcast clip with ffmpeg, publish it under
//! its deterministic key and persist the processed state.

pub mod video;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use video::{
    BroadcastProfile, FfmpegTranscoder, PipelineError, ProcessedVideo, TranscodeError,
    sweep_stale, Transcoder, VideoPipeline, WorkArea,
};
