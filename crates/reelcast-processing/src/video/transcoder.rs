//! ffmpeg rendering of the broadcast clip: intro bumper, main segment, outro
//! bumper, then a stream-copy concat.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::profile::BroadcastProfile;
use super::work_area::WorkArea;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("invalid ffmpeg path {0:?}: contains shell metacharacters")]
    InvalidBinary(String),
    #[error("failed to run ffmpeg for {step} step: {error}")]
    Spawn {
        step: &'static str,
        error: std::io::Error,
    },
    #[error("ffmpeg {step} step exited with {status}: {stderr}")]
    StepFailed {
        step: &'static str,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to write concat manifest: {0}")]
    Manifest(std::io::Error),
    #[error("ffmpeg produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Turns an original video into the processed clip inside a work area.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Render `input` and return the path of the finished file, which lives
    /// inside `work`.
    async fn render(&self, input: &Path, work: &WorkArea) -> Result<PathBuf, TranscodeError>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: String,
    profile: BroadcastProfile,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<String>, profile: BroadcastProfile) -> Result<Self, TranscodeError> {
        let ffmpeg_path = ffmpeg_path.into();
        let dangerous_chars = [';', '|', '&', '$', '`', '(', ')', '<', '>', '\n', '\r'];
        if ffmpeg_path.is_empty() || ffmpeg_path.chars().any(|c| dangerous_chars.contains(&c)) {
            return Err(TranscodeError::InvalidBinary(ffmpeg_path));
        }

        Ok(Self {
            ffmpeg_path,
            profile,
        })
    }

    pub fn profile(&self) -> &BroadcastProfile {
        &self.profile
    }

    /// Arguments rendering one bumper card into `output`.
    pub fn bumper_args(&self, output: &Path) -> Vec<OsString> {
        let p = &self.profile;
        let mut args = os_args(&["-y", "-f", "lavfi", "-i"]);
        args.push(p.bumper_source().into());
        args.push("-vf".into());
        args.push(p.bumper_filter().into());
        args.extend(self.encoder_args());
        args.push("-t".into());
        args.push(p.bumper_seconds.to_string().into());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Arguments rendering the trimmed, letterboxed and watermarked main
    /// segment without audio.
    pub fn main_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let p = &self.profile;
        let mut args = os_args(&["-y", "-i"]);
        args.push(input.as_os_str().to_owned());
        args.push("-t".into());
        args.push(p.max_main_seconds.to_string().into());
        args.push("-vf".into());
        args.push(p.main_filter().into());
        args.push("-an".into());
        args.extend(self.encoder_args());
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Arguments joining the segments listed in `manifest` without re-encoding.
    pub fn concat_args(&self, manifest: &Path, output: &Path) -> Vec<OsString> {
        let mut args = os_args(&["-y", "-f", "concat", "-safe", "0", "-i"]);
        args.push(manifest.as_os_str().to_owned());
        args.extend(os_args(&["-c", "copy"]));
        args.push(output.as_os_str().to_owned());
        args
    }

    fn encoder_args(&self) -> Vec<OsString> {
        let p = &self.profile;
        vec![
            "-c:v".into(),
            p.video_codec.into(),
            "-preset".into(),
            p.preset.into(),
            "-crf".into(),
            p.crf.to_string().into(),
        ]
    }

    async fn run_step(&self, step: &'static str, args: &[OsString]) -> Result<(), TranscodeError> {
        let started = Instant::now();
        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| TranscodeError::Spawn { step, error })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscodeError::StepFailed {
                step,
                status: output.status,
                stderr: stderr_tail(&stderr),
            });
        }

        tracing::debug!(
            step,
            duration_ms = started.elapsed().as_millis() as u64,
            "ffmpeg step finished"
        );
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    #[tracing::instrument(skip(self, input, work), fields(video_id = work.video_id()))]
    async fn render(&self, input: &Path, work: &WorkArea) -> Result<PathBuf, TranscodeError> {
        let intro = work.intro_path();
        let main = work.main_path();
        let outro = work.outro_path();
        let manifest = work.manifest_path();
        let output = work.output_path();

        self.run_step("intro", &self.bumper_args(&intro)).await?;
        self.run_step("main", &self.main_args(input, &main)).await?;
        self.run_step("outro", &self.bumper_args(&outro)).await?;

        tokio::fs::write(&manifest, concat_manifest(&[&intro, &main, &outro]))
            .await
            .map_err(TranscodeError::Manifest)?;
        self.run_step("concat", &self.concat_args(&manifest, &output))
            .await?;

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => Ok(output),
            _ => Err(TranscodeError::MissingOutput(output)),
        }
    }
}

/// Concat demuxer manifest. Entries are bare file names; the demuxer resolves
/// them against the manifest's own directory.
pub fn concat_manifest(segments: &[&Path]) -> String {
    segments
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .unwrap_or_else(|| path.as_os_str())
                .to_string_lossy()
                .replace('\'', "'\\''");
            format!("file '{}'\n", name)
        })
        .collect()
}

fn os_args(items: &[&str]) -> Vec<OsString> {
    items.iter().map(|s| OsStr::new(s).to_owned()).collect()
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn transcoder() -> FfmpegTranscoder {
        FfmpegTranscoder::new("ffmpeg", BroadcastProfile::STANDARD).unwrap()
    }

    #[test]
    fn rejects_shell_metacharacters_in_binary_path() {
        assert!(matches!(
            FfmpegTranscoder::new("ffmpeg; rm -rf /", BroadcastProfile::STANDARD),
            Err(TranscodeError::InvalidBinary(_))
        ));
        assert!(FfmpegTranscoder::new("/usr/local/bin/ffmpeg", BroadcastProfile::STANDARD).is_ok());
    }

    #[test]
    fn bumper_is_a_two_second_black_card() {
        let args = strings(&transcoder().bumper_args(Path::new("/w/intro.mp4")));
        assert_eq!(
            args,
            vec![
                "-y",
                "-f",
                "lavfi",
                "-i",
                "color=c=black:s=1280x720:d=2",
                "-vf",
                "drawtext=text='ANB':x=(w-text_w)/2:y=(h-text_h)/2:fontsize=72:fontcolor=white",
                "-c:v",
                "libx264",
                "-preset",
                "fast",
                "-crf",
                "23",
                "-t",
                "2",
                "/w/intro.mp4",
            ]
        );
    }

    #[test]
    fn main_segment_is_capped_and_silent() {
        let args = strings(
            &transcoder().main_args(Path::new("/w/input.mp4"), Path::new("/w/main.mp4")),
        );
        let t = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[t + 1], "30");
        assert!(args.contains(&"-an".to_string()));
        assert!(args.iter().any(|a| a.starts_with("scale=1280:720")));
        assert_eq!(args.last().unwrap(), "/w/main.mp4");
    }

    #[test]
    fn concat_copies_streams() {
        let args = strings(
            &transcoder().concat_args(Path::new("/w/files.txt"), Path::new("/w/out.mp4")),
        );
        assert_eq!(
            args,
            vec!["-y", "-f", "concat", "-safe", "0", "-i", "/w/files.txt", "-c", "copy", "/w/out.mp4"]
        );
    }

    #[test]
    fn manifest_lists_segments_in_order() {
        let manifest = concat_manifest(&[
            Path::new("/w/intro.mp4"),
            Path::new("/w/main.mp4"),
            Path::new("/w/outro.mp4"),
        ]);
        assert_eq!(
            manifest,
            "file 'intro.mp4'\nfile 'main.mp4'\nfile 'outro.mp4'\n"
        );
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let noisy: String = (0..50).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&noisy);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }

    #[tokio::test]
    async fn missing_binary_fails_on_first_step() {
        let root = tempfile::tempdir().unwrap();
        let work = WorkArea::create(root.path(), 1).await.unwrap();
        let transcoder =
            FfmpegTranscoder::new("/nonexistent/ffmpeg-binary", BroadcastProfile::STANDARD)
                .unwrap();

        let err = transcoder
            .render(&work.input_path(), &work)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Spawn { step: "intro", .. }));
    }
}
