use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Lifecycle status of an uploaded video.
///
/// `Processing` exists so rows written by other tools still decode; the worker
/// never persists it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl Display for VideoStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            VideoStatus::Uploaded => write!(f, "uploaded"),
            VideoStatus::Processing => write!(f, "processing"),
            VideoStatus::Processed => write!(f, "processed"),
            VideoStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for VideoStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(VideoStatus::Uploaded),
            "processing" => Ok(VideoStatus::Processing),
            "processed" => Ok(VideoStatus::Processed),
            "failed" => Ok(VideoStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid video status: {}", s)),
        }
    }
}

/// A row of the `videos` table as seen by the processing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    /// URL or storage key of the source bytes. Never mutated after upload.
    pub original_location: String,
    pub processed_location: Option<String>,
    pub status: VideoStatus,
    pub failure_reason: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("video {0}: processed_location/processed_at must be set iff status is processed")]
    ProcessedFields(i64),
    #[error("video {0}: original_location is empty")]
    MissingOriginal(i64),
    #[error("video {0}: failure_reason must be set iff status is failed")]
    FailureReason(i64),
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Video {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Video {
            id: row.try_get("id")?,
            owner_id: row.try_get("user_id")?,
            title: row
                .try_get::<Option<String>, _>("title")?
                .unwrap_or_default(),
            original_location: row
                .try_get::<Option<String>, _>("original_url")?
                .unwrap_or_default(),
            processed_location: row.try_get("processed_url")?,
            status: row
                .try_get::<Option<String>, _>("status")?
                .as_deref()
                .unwrap_or("uploaded")
                .parse()
                .map_err(|e| {
                    sqlx::Error::Decode(format!("Failed to parse video status: {}", e).into())
                })?,
            failure_reason: row.try_get("failure_reason")?,
            uploaded_at: row.try_get("uploaded_at")?,
            processed_at: row.try_get("processed_at")?,
        })
    }
}

impl Video {
    /// Whether the pipeline may (re)process this row.
    pub fn is_processable(&self) -> bool {
        matches!(self.status, VideoStatus::Uploaded | VideoStatus::Failed)
            && !self.original_location.trim().is_empty()
    }

    /// The processed form of this row. Consumes `self` so the caller cannot
    /// keep writing the stale copy.
    pub fn mark_processed(mut self, location: String, at: DateTime<Utc>) -> Self {
        self.status = VideoStatus::Processed;
        self.processed_location = Some(location);
        self.processed_at = Some(at);
        self.failure_reason = None;
        self
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let processed = self.status == VideoStatus::Processed;
        if processed != self.processed_location.is_some()
            || processed != self.processed_at.is_some()
        {
            return Err(InvariantViolation::ProcessedFields(self.id));
        }
        if self.original_location.trim().is_empty() {
            return Err(InvariantViolation::MissingOriginal(self.id));
        }
        if (self.status == VideoStatus::Failed) != self.failure_reason.is_some() {
            return Err(InvariantViolation::FailureReason(self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploaded(id: i64) -> Video {
        Video {
            id,
            owner_id: 7,
            title: "tryout".to_string(),
            original_location: "http://store/a.mp4".to_string(),
            processed_location: None,
            status: VideoStatus::Uploaded,
            failure_reason: None,
            uploaded_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            VideoStatus::Uploaded,
            VideoStatus::Processing,
            VideoStatus::Processed,
            VideoStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<VideoStatus>().unwrap(), status);
        }
        assert!("done".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn mark_processed_sets_the_whole_triple() {
        let video = uploaded(42);
        let at = Utc::now();
        let done = video.mark_processed("http://store/processed/42_processed.mp4".into(), at);

        assert_eq!(done.status, VideoStatus::Processed);
        assert_eq!(
            done.processed_location.as_deref(),
            Some("http://store/processed/42_processed.mp4")
        );
        assert_eq!(done.processed_at, Some(at));
        assert!(done.check_invariants().is_ok());
    }

    #[test]
    fn mark_processed_clears_previous_failure() {
        let mut video = uploaded(3);
        video.status = VideoStatus::Failed;
        video.failure_reason = Some("transcode: exit status 1".into());
        assert!(video.is_processable());

        let done = video.mark_processed("k".into(), Utc::now());
        assert!(done.failure_reason.is_none());
        assert!(done.check_invariants().is_ok());
    }

    #[test]
    fn invariant_violations_are_reported() {
        let mut video = uploaded(1);
        video.processed_location = Some("x".into());
        assert_eq!(
            video.check_invariants(),
            Err(InvariantViolation::ProcessedFields(1))
        );

        let mut video = uploaded(2);
        video.original_location = "  ".into();
        assert_eq!(
            video.check_invariants(),
            Err(InvariantViolation::MissingOriginal(2))
        );
        assert!(!video.is_processable());

        let mut video = uploaded(3);
        video.status = VideoStatus::Failed;
        assert_eq!(
            video.check_invariants(),
            Err(InvariantViolation::FailureReason(3))
        );
    }

    #[test]
    fn processed_rows_are_not_processable() {
        let video = uploaded(9).mark_processed("k".into(), Utc::now());
        assert!(!video.is_processable());
    }
}
