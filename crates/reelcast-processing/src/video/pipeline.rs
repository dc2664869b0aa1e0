//! Per-task processing algorithm.
//!
//! decode -> lookup -> download -> transcode -> upload -> update. Every stage
//! error is returned with its stage attached; the caller decides between retry
//! and drop. The work area is dropped on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;

use reelcast_core::models::{ProcessVideoPayload, Video};
use reelcast_core::VideoStore;
use reelcast_storage::keys::PROCESSED_CONTENT_TYPE;
use reelcast_storage::{processed_key, RemoteFetcher, Storage, StorageError};

use super::transcoder::{TranscodeError, Transcoder};
use super::work_area::WorkArea;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("video {0} not found")]
    VideoNotFound(i64),
    #[error("video {0} has no original location")]
    MissingOriginal(i64),
    #[error("lookup failed: {0:#}")]
    Lookup(anyhow::Error),
    #[error("failed to allocate work area: {0}")]
    WorkArea(std::io::Error),
    #[error("download of {location} failed: {error}")]
    Download { location: String, error: StorageError },
    #[error("transcode failed: {0}")]
    Transcode(TranscodeError),
    #[error("upload to {key} failed: {error}")]
    Upload { key: String, error: StorageError },
    #[error("record update failed: {0:#}")]
    RecordUpdate(anyhow::Error),
}

impl PipelineError {
    /// Stage that produced the error, used as a structured log field and in
    /// the task result.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::MalformedPayload(_) => "decode",
            PipelineError::VideoNotFound(_)
            | PipelineError::MissingOriginal(_)
            | PipelineError::Lookup(_) => "lookup",
            PipelineError::WorkArea(_) | PipelineError::Download { .. } => "download",
            PipelineError::Transcode(_) => "transcode",
            PipelineError::Upload { .. } => "upload",
            PipelineError::RecordUpdate(_) => "update",
        }
    }

    /// Whether a later attempt of the same task may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            PipelineError::MalformedPayload(_)
                | PipelineError::VideoNotFound(_)
                | PipelineError::MissingOriginal(_)
        )
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedVideo {
    pub video_id: i64,
    pub location: String,
    pub processed_at: DateTime<Utc>,
}

/// The processing worker's algorithm with its injected collaborators.
///
/// Built once at start-up and shared by every worker slot.
pub struct VideoPipeline {
    videos: Arc<dyn VideoStore>,
    storage: Arc<dyn Storage>,
    fetcher: RemoteFetcher,
    transcoder: Arc<dyn Transcoder>,
    work_root: PathBuf,
}

impl VideoPipeline {
    pub fn new(
        videos: Arc<dyn VideoStore>,
        storage: Arc<dyn Storage>,
        fetcher: RemoteFetcher,
        transcoder: Arc<dyn Transcoder>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            videos,
            storage,
            fetcher,
            transcoder,
            work_root: work_root.into(),
        }
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    pub fn videos(&self) -> &Arc<dyn VideoStore> {
        &self.videos
    }

    /// Decode the task payload into a record id.
    pub fn decode(payload: &Value) -> Result<i64, PipelineError> {
        let decoded: ProcessVideoPayload = serde_json::from_value(payload.clone())
            .map_err(|e| PipelineError::MalformedPayload(e.to_string()))?;
        decoded.record_id().ok_or_else(|| {
            PipelineError::MalformedPayload(format!("video_id {} out of range", decoded.video_id))
        })
    }

    pub async fn run(&self, payload: &Value) -> Result<ProcessedVideo, PipelineError> {
        let video_id = Self::decode(payload)?;
        self.process(video_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn process(&self, video_id: i64) -> Result<ProcessedVideo, PipelineError> {
        let started = Instant::now();

        let video = self
            .videos
            .find_video(video_id)
            .await
            .map_err(PipelineError::Lookup)?
            .ok_or(PipelineError::VideoNotFound(video_id))?;
        if video.original_location.trim().is_empty() {
            return Err(PipelineError::MissingOriginal(video_id));
        }

        let work = WorkArea::create(&self.work_root, video_id)
            .await
            .map_err(PipelineError::WorkArea)?;

        let input = work.input_path();
        let size_bytes = self.download(&video.original_location, &input).await?;
        tracing::debug!(video_id, size_bytes, "Original downloaded");

        let rendered = self
            .transcoder
            .render(&input, &work)
            .await
            .map_err(PipelineError::Transcode)?;

        let key = processed_key(video_id);
        let location = self
            .storage
            .upload_file(&key, &rendered, PROCESSED_CONTENT_TYPE)
            .await
            .map_err(|error| PipelineError::Upload {
                key: key.clone(),
                error,
            })?;

        let processed = self.persist(video, location).await?;
        drop(work);

        tracing::info!(
            video_id,
            processed_location = %processed.location,
            duration_ms = started.elapsed().as_millis() as u64,
            "Video processed"
        );
        Ok(processed)
    }

    /// Fetch the original into `dest`: through the artifact store when the
    /// location resolves to one of its keys, over HTTP otherwise.
    async fn download(&self, location: &str, dest: &Path) -> Result<u64, PipelineError> {
        let wrap = |error: StorageError| PipelineError::Download {
            location: location.to_string(),
            error,
        };

        match self.storage.download_location(location).await {
            Ok(bytes) => {
                tokio::fs::write(dest, &bytes)
                    .await
                    .map_err(|e| wrap(StorageError::IoError(e)))?;
                Ok(bytes.len() as u64)
            }
            Err(StorageError::ForeignLocation(_)) => {
                self.fetcher.fetch_to_file(location, dest).await.map_err(wrap)
            }
            Err(e) => Err(wrap(e)),
        }
    }

    async fn persist(&self, video: Video, location: String) -> Result<ProcessedVideo, PipelineError> {
        let mut processed_at = Utc::now();
        // processed_at >= uploaded_at even under clock skew between hosts
        if processed_at < video.uploaded_at {
            processed_at = video.uploaded_at;
        }

        let video = video.mark_processed(location, processed_at);
        self.videos
            .save_processed(&video)
            .await
            .map_err(PipelineError::RecordUpdate)?;

        Ok(ProcessedVideo {
            video_id: video.id,
            location: video.processed_location.unwrap_or_default(),
            processed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_accepts_unsigned_ids() {
        assert_eq!(VideoPipeline::decode(&json!({ "video_id": 42 })).unwrap(), 42);
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        for payload in [
            json!({ "video_id": "not-a-number" }),
            json!({ "video_id": -3 }),
            json!({ "video_id": u64::MAX }),
            json!({}),
            json!(null),
        ] {
            let err = VideoPipeline::decode(&payload).unwrap_err();
            assert!(matches!(err, PipelineError::MalformedPayload(_)), "{payload}");
            assert!(!err.is_transient());
            assert_eq!(err.stage(), "decode");
        }
    }

    #[test]
    fn stage_errors_are_classified() {
        assert!(!PipelineError::VideoNotFound(1).is_transient());
        let download = PipelineError::Download {
            location: "a.mp4".to_string(),
            error: StorageError::NotFound("a.mp4".to_string()),
        };
        assert!(download.is_transient());
        assert_eq!(download.stage(), "download");
        let update = PipelineError::RecordUpdate(anyhow::anyhow!("connection reset"));
        assert!(update.is_transient());
        assert_eq!(update.stage(), "update");
    }
}
