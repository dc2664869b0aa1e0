//! Record-store contract used by the processing pipeline.

use async_trait::async_trait;

use crate::models::Video;

/// Access to `videos` rows.
///
/// Implemented over Postgres by `reelcast-db`; tests use an in-memory mock.
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn find_video(&self, id: i64) -> anyhow::Result<Option<Video>>;

    /// Persist the processed triple (status, location, timestamp) and clear
    /// any failure reason in a single statement.
    async fn save_processed(&self, video: &Video) -> anyhow::Result<()>;

    /// Set `status = failed` with `reason`. Rows already `processed` are left
    /// alone; returns whether a row changed.
    async fn mark_failed(&self, id: i64, reason: &str) -> anyhow::Result<bool>;
}
