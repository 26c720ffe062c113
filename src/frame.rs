use crate::error::WiError;
use crate::timestamp::Timestamp;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::process::Command;

/// Produces one still image from a video at a given position.
///
/// Implementations write `dest` in full or not at all, and calling again with the
/// same arguments replaces the previous file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract(
        &self,
        video: &Path,
        at: &Timestamp,
        dest: &Path,
    ) -> std::result::Result<PathBuf, WiError>;
}

/// Reserves a temp file next to `dest` so the final rename stays on one filesystem.
fn staging_path(dest: &Path) -> std::io::Result<tempfile::TempPath> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let suffix = dest
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    Ok(tempfile::Builder::new()
        .prefix(".frame-")
        .suffix(&suffix)
        .tempfile_in(dir)?
        .into_temp_path())
}

pub struct FfmpegFrameExtractor {
    binary: PathBuf,
    timeout: Duration,
    width: Option<u32>,
}

impl FfmpegFrameExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(30),
            width: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_width(mut self, width: Option<u32>) -> Self {
        self.width = width;
        self
    }

    fn command(&self, video: &Path, at: &Timestamp, out: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-ss"])
            .arg(at.seek_arg())
            .arg("-i")
            .arg(video)
            .args(["-frames:v", "1", "-update", "1"]);
        if let Some(width) = self.width {
            cmd.arg("-vf").arg(format!("scale={}:-2", width));
        }
        cmd.arg(out)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for FfmpegFrameExtractor {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract(
        &self,
        video: &Path,
        at: &Timestamp,
        dest: &Path,
    ) -> std::result::Result<PathBuf, WiError> {
        let staged = staging_path(dest).map_err(|e| WiError::extraction(*at, e.to_string()))?;

        let mut cmd = self.command(video, at, &staged);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                WiError::extraction(*at, format!("decoder timed out after {:?}", self.timeout))
            })?
            .map_err(|e| {
                WiError::extraction(*at, format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let snippet = stderr.trim().chars().take(400).collect::<String>();
            return Err(WiError::extraction(
                *at,
                format!("decoder exited with {}: {}", output.status, snippet),
            ));
        }

        let size = std::fs::metadata(&staged).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(WiError::extraction(*at, "decoder produced no frame"));
        }

        staged
            .persist(dest)
            .map_err(|e| WiError::extraction(*at, format!("publish failed: {}", e.error)))?;
        Ok(dest.to_path_buf())
    }
}

/// Container duration in seconds, used to clamp seeks that run past the end.
pub async fn probe_duration(ffprobe: &Path, video: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(video)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.1 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }
    Ok(duration)
}

/// Smallest valid PNG: one transparent pixel.
pub const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// In-process extractor that writes a fixed image. Used for dry runs and tests.
pub struct StaticFrameExtractor {
    bytes: Vec<u8>,
    failing: HashSet<Timestamp>,
    calls: AtomicUsize,
    seeks: Mutex<Vec<Timestamp>>,
}

impl StaticFrameExtractor {
    pub fn new() -> Self {
        Self::with_bytes(PLACEHOLDER_PNG.to_vec())
    }

    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
            seeks: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, at: Timestamp) -> Self {
        self.failing.insert(at);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Seek position of the most recent call.
    pub fn last_seek(&self) -> Option<Timestamp> {
        self.seeks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .copied()
    }
}

impl Default for StaticFrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameExtractor for StaticFrameExtractor {
    async fn extract(
        &self,
        _video: &Path,
        at: &Timestamp,
        dest: &Path,
    ) -> std::result::Result<PathBuf, WiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seeks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*at);
        if self.failing.contains(at) {
            return Err(WiError::extraction(*at, "seek past end of stream"));
        }

        let staged = staging_path(dest).map_err(|e| WiError::extraction(*at, e.to_string()))?;
        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&staged)
            .and_then(|mut f| f.write_all(&self.bytes))
            .map_err(|e| WiError::extraction(*at, e.to_string()))?;
        staged
            .persist(dest)
            .map_err(|e| WiError::extraction(*at, format!("publish failed: {}", e.error)))?;
        Ok(dest.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_decoder_is_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FfmpegFrameExtractor::new("definitely-not-a-decoder-binary")
            .with_timeout(Duration::from_secs(5));
        let at = Timestamp::parse("00:05").unwrap();
        let dest = dir.path().join("frame_00_05.png");

        let err = extractor
            .extract(Path::new("missing.mp4"), &at, &dest)
            .await
            .unwrap_err();
        match err {
            WiError::ExtractionFailed { timestamp, .. } => assert_eq!(timestamp, at),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!dest.exists());
        // the staging file is cleaned up with its TempPath
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn static_extractor_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = StaticFrameExtractor::new();
        let at = Timestamp::parse("12.5s").unwrap();
        let dest = dir.path().join("frame.png");

        extractor.extract(Path::new("v.mp4"), &at, &dest).await.unwrap();
        let first = std::fs::read(&dest).unwrap();
        extractor.extract(Path::new("v.mp4"), &at, &dest).await.unwrap();
        let second = std::fs::read(&dest).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, PLACEHOLDER_PNG);
        assert_eq!(extractor.calls(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn static_extractor_can_fail_on_demand() {
        let dir = tempfile::tempdir().unwrap();
        let at = Timestamp::parse("00:09").unwrap();
        let extractor = StaticFrameExtractor::new().failing_at(at);
        let result = extractor
            .extract(Path::new("v.mp4"), &at, &dir.path().join("x.png"))
            .await;
        assert!(matches!(result, Err(WiError::ExtractionFailed { .. })));
    }
}
