//! Transcoder stand-in that never spawns ffmpeg

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::video::{TranscodeError, Transcoder, WorkArea};

/// Writes a deterministic "rendered" file derived from the input, or fails
/// after leaving an intermediate segment behind.
#[derive(Clone, Default)]
pub struct FakeTranscoder {
    fail: bool,
    delay: Option<Duration>,
    work_dirs: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Hold each render for `delay`, to overlap concurrent runs.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Work area directories seen so far, in call order.
    pub fn work_dirs(&self) -> Vec<PathBuf> {
        self.work_dirs.lock().unwrap().clone()
    }

    pub fn rendered_bytes(input: &[u8]) -> Vec<u8> {
        let mut out = b"ANB|".to_vec();
        out.extend_from_slice(input);
        out.extend_from_slice(b"|ANB");
        out
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn render(&self, input: &Path, work: &WorkArea) -> Result<PathBuf, TranscodeError> {
        self.work_dirs.lock().unwrap().push(work.path().to_path_buf());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step_io = |step: &'static str, error: std::io::Error| TranscodeError::Spawn { step, error };
        tokio::fs::write(work.intro_path(), b"intro")
            .await
            .map_err(|e| step_io("intro", e))?;

        if self.fail {
            return Err(step_io(
                "main",
                std::io::Error::new(std::io::ErrorKind::Other, "fake ffmpeg crashed"),
            ));
        }

        let original = tokio::fs::read(input).await.map_err(|e| step_io("main", e))?;
        let output = work.output_path();
        tokio::fs::write(&output, Self::rendered_bytes(&original))
            .await
            .map_err(|e| step_io("concat", e))?;
        Ok(output)
    }
}
