//! Mock record store for testing

use anyhow::Result;
use async_trait::async_trait;
use reelcast_core::models::{Video, VideoStatus};
use reelcast_core::VideoStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory `videos` table with call counters.
#[derive(Clone, Default)]
pub struct MockVideoStore {
    videos: Arc<Mutex<HashMap<i64, Video>>>,
    find_calls: Arc<AtomicUsize>,
    save_calls: Arc<AtomicUsize>,
    fail_calls: Arc<AtomicUsize>,
    reject_saves: Arc<AtomicBool>,
}

impl MockVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, video: Video) {
        self.videos.lock().unwrap().insert(video.id, video);
    }

    pub fn get(&self, id: i64) -> Option<Video> {
        self.videos.lock().unwrap().get(&id).cloned()
    }

    /// Make every following `save_processed` fail.
    pub fn reject_saves(&self, reject: bool) {
        self.reject_saves.store(reject, Ordering::SeqCst);
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn fail_calls(&self) -> usize {
        self.fail_calls.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn calls(&self) -> usize {
        self.find_calls() + self.save_calls() + self.fail_calls()
    }
}

#[async_trait]
impl VideoStore for MockVideoStore {
    async fn find_video(&self, id: i64) -> Result<Option<Video>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(id))
    }

    async fn save_processed(&self, video: &Video) -> Result<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_saves.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset by peer");
        }
        video.check_invariants()?;

        let mut videos = self.videos.lock().unwrap();
        match videos.get_mut(&video.id) {
            Some(row) => {
                row.status = VideoStatus::Processed;
                row.processed_location = video.processed_location.clone();
                row.processed_at = video.processed_at;
                row.failure_reason = None;
                Ok(())
            }
            None => anyhow::bail!("video {} disappeared before update", video.id),
        }
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<bool> {
        self.fail_calls.fetch_add(1, Ordering::SeqCst);
        let mut videos = self.videos.lock().unwrap();
        match videos.get_mut(&id) {
            Some(row) if row.status != VideoStatus::Processed => {
                row.status = VideoStatus::Failed;
                row.failure_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
