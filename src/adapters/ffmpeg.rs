//! ffmpeg adapter for audio extraction.
//!
//! Spawns `ffmpeg` as a subprocess and converts the video's audio track to
//! signed 16-bit little-endian PCM, 16 kHz, one channel.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{AudioExtractor, ExtractionError};

/// Default per-invocation timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// ffmpeg-backed extractor
pub struct FfmpegExtractor {
    /// Path to the ffmpeg binary (default: "ffmpeg")
    binary_path: String,

    /// Upper bound on one transcode
    timeout: Duration,
}

impl Default for FfmpegExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegExtractor {
    /// Create an extractor that resolves `ffmpeg` from PATH
    pub fn new() -> Self {
        Self::with_binary_path("ffmpeg")
    }

    /// Create an extractor with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments selecting mono 16 kHz pcm_s16le with overwrite enabled
    fn args(video: &Path, audio_out: &Path) -> Vec<std::ffi::OsString> {
        vec![
            "-i".into(),
            video.as_os_str().to_owned(),
            "-vn".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            audio_out.as_os_str().to_owned(),
            "-y".into(),
        ]
    }
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn extract(&self, video: &Path, audio_out: &Path) -> Result<(), ExtractionError> {
        debug!(video = %video.display(), audio = %audio_out.display(), "Running ffmpeg");

        let child = Command::new(&self.binary_path)
            .args(Self::args(video, audio_out))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractionError::Spawn {
                tool: self.binary_path.clone(),
                source,
            })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractionError::TimedOut {
                tool: self.binary_path.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| ExtractionError::Spawn {
                tool: self.binary_path.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::ToolFailed {
                tool: self.binary_path.clone(),
                code: output.status.code().unwrap_or(-1),
                diagnostics: stderr.trim().to_string(),
            });
        }

        let produced = tokio::fs::metadata(audio_out)
            .await
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);

        if !produced {
            return Err(ExtractionError::NoOutput {
                tool: self.binary_path.clone(),
                path: audio_out.display().to_string(),
            });
        }

        Ok(())
    }
}
