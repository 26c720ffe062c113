use crate::error::WiError;
use crate::frame::FrameExtractor;
use crate::parser::Step;
use crate::timestamp::Timestamp;
use crate::{logi, logok, logw};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Result of [`StepRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted(usize),
    /// A step with the same timestamp already exists at this index and was kept as is.
    Duplicate(usize),
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub extracted: usize,
    pub failures: Vec<WiError>,
}

/// Ordered, session-scoped collection of steps.
///
/// Timestamps are unique. The registry owns every image file referenced by its steps
/// and keeps the source video path so any step can be re-extracted later. The cursor
/// is `None` exactly when the registry is empty.
#[derive(Debug)]
pub struct StepRegistry {
    video_path: PathBuf,
    frame_dir: PathBuf,
    video_duration: Option<f64>,
    steps: Vec<Step>,
    cursor: Option<usize>,
}

impl StepRegistry {
    pub fn new(video_path: impl Into<PathBuf>, frame_dir: impl Into<PathBuf>) -> Self {
        Self {
            video_path: video_path.into(),
            frame_dir: frame_dir.into(),
            video_duration: None,
            steps: Vec::new(),
            cursor: None,
        }
    }

    pub fn with_steps(
        video_path: impl Into<PathBuf>,
        frame_dir: impl Into<PathBuf>,
        steps: impl IntoIterator<Item = Step>,
    ) -> Self {
        let mut registry = Self::new(video_path, frame_dir);
        for step in steps {
            registry.add(step);
        }
        registry
    }

    pub fn video_path(&self) -> &Path {
        &self.video_path
    }

    pub fn frame_dir(&self) -> &Path {
        &self.frame_dir
    }

    /// Seeks beyond this many seconds are pulled back inside the stream.
    pub fn set_video_duration(&mut self, seconds: Option<f64>) {
        self.video_duration = seconds;
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    pub fn get(&self, index: usize) -> Result<&Step, WiError> {
        self.steps.get(index).ok_or(WiError::IndexOutOfRange {
            index,
            len: self.steps.len(),
        })
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn current(&self) -> Option<&Step> {
        self.cursor.and_then(|i| self.steps.get(i))
    }

    pub fn add(&mut self, mut step: Step) -> AddOutcome {
        if let Some(existing) = self.position_of(&step.timestamp) {
            return AddOutcome::Duplicate(existing);
        }
        // a fresh step never points at a file the registry did not produce
        step.image = None;
        self.steps.push(step);
        if self.cursor.is_none() {
            self.cursor = Some(0);
        }
        AddOutcome::Inserted(self.steps.len() - 1)
    }

    /// Drops the step and unlinks its image. Unlink failures are logged only.
    pub fn remove(&mut self, index: usize) -> Result<Step, WiError> {
        self.check_index(index)?;
        let mut step = self.steps.remove(index);

        if let Some(image) = step.image.take() {
            if let Err(err) = std::fs::remove_file(&image) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    logw(format!("Could not delete frame {}: {}", image.display(), err));
                }
            }
        }

        self.cursor = match (self.cursor, self.steps.len()) {
            (_, 0) => None,
            (Some(c), len) => Some(c.min(len - 1)),
            (None, _) => Some(0),
        };
        Ok(step)
    }

    /// Moves a step to a new index. The cursor follows the step it was on.
    pub fn move_step(&mut self, from: usize, to: usize) -> Result<(), WiError> {
        self.check_index(from)?;
        self.check_index(to)?;
        if from == to {
            return Ok(());
        }

        let step = self.steps.remove(from);
        self.steps.insert(to, step);

        if let Some(c) = self.cursor {
            self.cursor = Some(if c == from {
                to
            } else if from < c && c <= to {
                c - 1
            } else if to <= c && c < from {
                c + 1
            } else {
                c
            });
        }
        Ok(())
    }

    /// Clamped to `[0, len-1]`; never wraps.
    pub fn move_cursor(&mut self, delta: isize) -> Option<usize> {
        let current = self.cursor?;
        let last = self.steps.len().checked_sub(1)?;
        let next = (current as isize).saturating_add(delta).clamp(0, last as isize) as usize;
        self.cursor = Some(next);
        self.cursor
    }

    pub fn set_cursor(&mut self, index: usize) -> Result<(), WiError> {
        self.check_index(index)?;
        self.cursor = Some(index);
        Ok(())
    }

    pub fn find_by_timestamp(&self, at: &Timestamp) -> Option<&Step> {
        self.steps.iter().find(|s| s.timestamp == *at)
    }

    pub fn position_of(&self, at: &Timestamp) -> Option<usize> {
        self.steps.iter().position(|s| s.timestamp == *at)
    }

    /// Reorders by time value. Callers opt into this; insertion order is the default.
    pub fn sort_chronological(&mut self) {
        let current = self.current().map(|s| s.timestamp);
        self.steps.sort_by_key(|s| s.timestamp);
        if let Some(ts) = current {
            self.cursor = self.position_of(&ts);
        }
    }

    /// Where the image for `at` lives. Stable, so re-extraction overwrites in place.
    pub fn image_path_for(&self, at: &Timestamp) -> PathBuf {
        self.frame_dir.join(format!("frame_{}.png", at.file_stem()))
    }

    fn seek_for(&self, at: &Timestamp) -> Timestamp {
        match self.video_duration {
            Some(duration) if at.as_secs_f64() >= duration => {
                let clamped = at.clamped_to((duration - 0.1).max(0.0));
                logw(format!(
                    "Seek {} is past the end of the video ({:.2}s); using {}",
                    at, duration, clamped
                ));
                clamped
            }
            _ => *at,
        }
    }

    /// Regenerates the image of one step from the original video.
    pub async fn re_extract(
        &mut self,
        index: usize,
        extractor: &dyn FrameExtractor,
    ) -> Result<PathBuf, WiError> {
        self.check_index(index)?;
        let at = self.steps[index].timestamp;
        let dest = self.image_path_for(&at);
        let seek = self.seek_for(&at);

        let path = extractor
            .extract(&self.video_path, &seek, &dest)
            .await
            .map_err(|err| match err {
                WiError::ExtractionFailed { reason, .. } => WiError::ExtractionFailed {
                    timestamp: at,
                    reason,
                },
                other => other,
            })?;
        self.steps[index].image = Some(path.clone());
        Ok(path)
    }

    /// Extracts every step's image, running up to `concurrency` decoders at once.
    /// Results are applied one by one after all extractions finish.
    pub async fn extract_all(
        &mut self,
        extractor: Arc<dyn FrameExtractor>,
        concurrency: usize,
    ) -> ExtractionReport {
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for step in &self.steps {
            let at = step.timestamp;
            let seek = self.seek_for(&at);
            let dest = self.image_path_for(&at);
            let video = self.video_path.clone();
            let extractor = Arc::clone(&extractor);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = extractor.extract(&video, &seek, &dest).await;
                (at, result)
            });
        }

        logi(format!("Extracting {} frame(s)...", self.steps.len()));
        let mut report = ExtractionReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (at, result) = match joined {
                Ok(v) => v,
                Err(err) => {
                    logw(format!("Frame task aborted: {}", err));
                    continue;
                }
            };
            match result {
                Ok(path) => match self.position_of(&at) {
                    Some(i) => {
                        self.steps[i].image = Some(path);
                        report.extracted += 1;
                    }
                    None => logw(format!("Frame for {} has no step anymore", at)),
                },
                Err(err) => {
                    logw(format!("Skipping frame at {}: {}", at, err));
                    let err = match err {
                        WiError::ExtractionFailed { reason, .. } => WiError::ExtractionFailed {
                            timestamp: at,
                            reason,
                        },
                        other => other,
                    };
                    report.failures.push(err);
                }
            }
        }

        logok(format!(
            "Frames extracted: {} ok, {} failed",
            report.extracted,
            report.failures.len()
        ));
        report
    }

    /// Removes every step and its image.
    pub fn clear(&mut self) {
        while !self.steps.is_empty() {
            let _ = self.remove(self.steps.len() - 1);
        }
        self.cursor = None;
    }

    fn check_index(&self, index: usize) -> Result<(), WiError> {
        if index >= self.steps.len() {
            return Err(WiError::IndexOutOfRange {
                index,
                len: self.steps.len(),
            });
        }
        Ok(())
    }
}
