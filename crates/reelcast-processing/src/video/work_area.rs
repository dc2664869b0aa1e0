//! Per-execution scratch directory.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

const PREFIX: &str = "video-";

/// Private directory holding every intermediate file of one task execution.
///
/// The name carries the video id and a random suffix, so concurrent or
/// redelivered executions for the same id never share files. The directory
/// and its contents are removed when the value is dropped, on success,
/// error and unwind alike.
#[derive(Debug)]
pub struct WorkArea {
    dir: TempDir,
    video_id: i64,
}

impl WorkArea {
    pub async fn create(root: &Path, video_id: i64) -> io::Result<Self> {
        let root = root.to_path_buf();
        let dir = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&root)?;
            tempfile::Builder::new()
                .prefix(&format!("{}{}-", PREFIX, video_id))
                .tempdir_in(&root)
        })
        .await
        .map_err(io::Error::other)??;

        tracing::debug!(video_id, path = %dir.path().display(), "Work area allocated");
        Ok(Self { dir, video_id })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn video_id(&self) -> i64 {
        self.video_id
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join("input.mp4")
    }

    pub fn intro_path(&self) -> PathBuf {
        self.dir.path().join("intro.mp4")
    }

    pub fn main_path(&self) -> PathBuf {
        self.dir.path().join("main.mp4")
    }

    pub fn outro_path(&self) -> PathBuf {
        self.dir.path().join("outro.mp4")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.path().join("files.txt")
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir
            .path()
            .join(format!("{}_processed.mp4", self.video_id))
    }

    /// Remove the directory now, surfacing any error that `Drop` would swallow.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

/// Remove work areas under `root` older than `max_age`.
///
/// Directories left behind by a crashed process are never dropped; this runs
/// at worker start-up. The age threshold keeps it from touching areas that a
/// sibling worker sharing the same root is still using.
pub async fn sweep_stale(root: &Path, max_age: Duration) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(PREFIX) {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_dir() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(error = %e, path = %entry.path().display(), "Failed to remove stale work area")
            }
        }
    }

    if removed > 0 {
        tracing::info!(removed, root = %root.display(), "Swept stale work areas");
    }
    Ok(removed)
}
