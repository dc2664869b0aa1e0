//! Test helpers for pipeline and worker tests
//!
//! In-memory record store, artifact store and a fake transcoder, so the
//! pipeline can run without Postgres, S3 or ffmpeg.

pub mod fake_transcoder;
pub mod mock_storage;
pub mod mock_store;

pub use fake_transcoder::FakeTranscoder;
pub use mock_storage::MockStorage;
pub use mock_store::MockVideoStore;

use chrono::{DateTime, Duration, Utc};
use reelcast_core::models::{Video, VideoStatus};

/// An `uploaded` row as the upload API leaves it.
pub fn uploaded_video(id: i64, original_location: &str) -> Video {
    uploaded_video_at(id, original_location, Utc::now() - Duration::seconds(5))
}

pub fn uploaded_video_at(id: i64, original_location: &str, uploaded_at: DateTime<Utc>) -> Video {
    Video {
        id,
        owner_id: 1,
        title: format!("tryout {}", id),
        original_location: original_location.to_string(),
        processed_location: None,
        status: VideoStatus::Uploaded,
        failure_reason: None,
        uploaded_at,
        processed_at: None,
    }
}
