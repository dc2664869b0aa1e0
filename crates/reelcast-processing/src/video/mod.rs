//! Video processing module

pub mod pipeline;
pub mod profile;
pub mod transcoder;
pub mod work_area;

pub use pipeline::{PipelineError, ProcessedVideo, VideoPipeline};
pub use profile::BroadcastProfile;
pub use transcoder::{FfmpegTranscoder, TranscodeError, Transcoder};
pub use work_area::{sweep_stale, WorkArea};
