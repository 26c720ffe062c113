use crate::document::{AssembleOptions, Assembly, assemble_with};
use crate::error::WiError;
use crate::frame::{FrameExtractor, probe_duration};
use crate::parser::{Draft, parse};
use crate::registry::{ExtractionReport, StepRegistry};
use crate::{logi, logw};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// State for one video under review: the source video, the draft generated for it,
/// and the editable steps with their extracted frames.
///
/// Every operation goes through this value; nothing is kept in globals. Frames live
/// in a scratch directory removed when the session is dropped.
#[derive(Debug)]
pub struct Session {
    video_path: PathBuf,
    draft: Option<Draft>,
    registry: StepRegistry,
    workspace: TempDir,
}

impl Session {
    pub fn create(video_path: impl Into<PathBuf>) -> Result<Self, WiError> {
        let video_path = video_path.into();
        if !video_path.is_file() {
            return Err(WiError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("video not found: {}", video_path.display()),
            )));
        }

        let workspace = tempfile::Builder::new().prefix("video-wi-").tempdir()?;
        let registry = StepRegistry::new(&video_path, workspace.path());
        Ok(Self {
            video_path,
            draft: None,
            registry,
            workspace,
        })
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn frame_dir(&self) -> &Path {
        self.workspace.path()
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut StepRegistry {
        &mut self.registry
    }

    /// Drops the draft and every step (and its frame). The video stays.
    pub fn reset(&mut self) {
        self.registry.clear();
        self.draft = None;
    }

    /// Replaces the draft and rebuilds the steps from it.
    ///
    /// `NoMarkersFound` leaves a valid session with an empty registry; the draft can
    /// still be exported as prose.
    pub fn load_draft(&mut self, draft: impl Into<Draft>) -> Result<usize, WiError> {
        self.reset();
        let draft = draft.into();
        for step in parse(&draft) {
            self.registry.add(step);
        }
        self.draft = Some(draft);

        let count = self.registry.len();
        if count == 0 {
            return Err(WiError::NoMarkersFound);
        }
        logi(format!("Parsed {} step(s) from draft", count));
        Ok(count)
    }

    /// Reads the video duration so out-of-range seeks get clamped. Failure only logs.
    pub async fn probe_video(&mut self, ffprobe: &Path) {
        match probe_duration(ffprobe, &self.video_path).await {
            Ok(seconds) => self.registry.set_video_duration(Some(seconds)),
            Err(err) => logw(format!(
                "Could not read duration of {}: {}",
                self.video_path.display(),
                err
            )),
        }
    }

    pub async fn extract_frames(
        &mut self,
        extractor: Arc<dyn FrameExtractor>,
        concurrency: usize,
    ) -> ExtractionReport {
        self.registry.extract_all(extractor, concurrency).await
    }

    pub async fn re_extract(
        &mut self,
        index: usize,
        extractor: &dyn FrameExtractor,
    ) -> Result<PathBuf, WiError> {
        self.registry.re_extract(index, extractor).await
    }

    pub fn delete_step(&mut self, index: usize) -> Result<(), WiError> {
        self.registry.remove(index).map(|_| ())
    }

    pub fn assemble(&self, opts: &AssembleOptions) -> Assembly {
        let text = self.draft.as_ref().map(Draft::as_str).unwrap_or_default();
        assemble_with(text, &self.registry, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StaticFrameExtractor;

    fn video(dir: &Path) -> PathBuf {
        let path = dir.join("line.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[test]
    fn create_requires_existing_video() {
        let err = Session::create("/nonexistent/video.mp4").unwrap_err();
        assert!(matches!(err, WiError::Io(_)));
    }

    #[test]
    fn load_draft_rebuilds_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::create(video(dir.path())).unwrap();

        assert_eq!(session.load_draft("[00:05] Fold box\n[00:12] Seal box").unwrap(), 2);
        assert_eq!(session.registry().cursor(), Some(0));

        assert_eq!(session.load_draft("[00:30] Only step").unwrap(), 1);
        assert_eq!(session.registry().steps()[0].label_text, "Only step");
        assert_eq!(session.registry().video_path(), session.video_path());
    }

    #[test]
    fn draft_without_markers_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::create(video(dir.path())).unwrap();

        let err = session.load_draft("## Overview\nNo times here.").unwrap_err();
        assert!(matches!(err, WiError::NoMarkersFound));
        assert!(err.is_recoverable());
        assert!(session.draft().is_some());
        assert!(session.registry().is_empty());

        let assembly = session.assemble(&AssembleOptions::default());
        assert_eq!(assembly.document.blocks.len(), 3);
    }

    #[tokio::test]
    async fn frames_live_in_session_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::create(video(dir.path())).unwrap();
        session.load_draft("[00:01] a\n[00:02] b").unwrap();

        let report = session
            .extract_frames(Arc::new(StaticFrameExtractor::new()), 4)
            .await;
        assert_eq!(report.extracted, 2);

        let frame = session.registry().steps()[0].image().unwrap().to_path_buf();
        assert!(frame.starts_with(session.frame_dir()));

        session.reset();
        assert!(!frame.exists());
        assert!(session.draft().is_none());

        let workspace = session.frame_dir().to_path_buf();
        drop(session);
        assert!(!workspace.exists());
    }
}
