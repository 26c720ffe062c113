use crate::api::DraftGenerator;
use crate::api::storage::upload_video;
use crate::api::vertex::VertexClient;
use crate::config::Config;
use crate::document::{AssembleOptions, Assembly};
use crate::docx::DocxWriter;
use crate::error::WiError;
use crate::frame::{FfmpegFrameExtractor, FrameExtractor};
use crate::init::{DRAFTS_DIR, OUTPUT_DIR, VIDEOS_DIR};
use crate::session::Session;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use walkdir::WalkDir;

async fn file_exists(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn ensure_dir(path: &Path) -> Result<()> {
    if fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(());
    }
    fs::create_dir_all(path).await?;
    Ok(())
}

fn strip_ext(path: &Path) -> String {
    path.file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("video")
        .to_string()
}

pub fn assemble_options(cfg: &Config) -> AssembleOptions {
    AssembleOptions {
        title: cfg.document_title.clone(),
        image_width_inches: cfg.image_width_inches,
        ..AssembleOptions::default()
    }
}

pub fn frame_extractor(cfg: &Config) -> Arc<dyn FrameExtractor> {
    Arc::new(
        FfmpegFrameExtractor::new(&cfg.ffmpeg_bin)
            .with_timeout(cfg.frame_timeout())
            .with_width(cfg.frame_width),
    )
}

/// Writes the session's current state to `out_docx`.
pub async fn write_document(cfg: &Config, session: &Session, out_docx: &Path) -> Result<Assembly> {
    let assembly = session.assemble(&assemble_options(cfg));
    if let Some(warning) = assembly.warning() {
        logw(warning.to_string());
    }

    let doc = assembly.document.clone();
    let out = out_docx.to_path_buf();
    tokio::task::spawn_blocking(move || DocxWriter::new().write_to_path(&doc, &out))
        .await
        .context("docx writer task failed")??;

    logok(format!("Wrote document: {}", out_docx.display()));
    Ok(assembly)
}

/// Draft text in, exported document out: parse, extract every frame, assemble, write.
pub async fn build_from_draft(
    cfg: &Config,
    video: &Path,
    draft: String,
    extractor: Arc<dyn FrameExtractor>,
    out_docx: &Path,
) -> Result<Assembly> {
    let mut session = Session::create(video)?;

    match session.load_draft(draft) {
        Ok(_) => {}
        Err(WiError::NoMarkersFound) => {
            logw("No timestamp markers in draft; exporting text only.".to_string());
        }
        Err(err) => return Err(err.into()),
    }

    if !session.registry().is_empty() {
        session.probe_video(&cfg.ffprobe_bin).await;
        let report = session
            .extract_frames(extractor, cfg.extraction_concurrency)
            .await;
        for failure in &report.failures {
            logw(failure.to_string());
        }
    }

    write_document(cfg, &session, out_docx).await
}

/// Reuses `drafts/<title>.md` when present, otherwise uploads and asks the model.
async fn obtain_draft(
    cfg: &Config,
    client: &reqwest::Client,
    generator: &dyn DraftGenerator,
    video: &Path,
    draft_path: &Path,
) -> Result<String> {
    if file_exists(draft_path).await {
        let text = fs::read_to_string(draft_path)
            .await
            .with_context(|| format!("read draft: {}", draft_path.display()))?;
        if !text.trim().is_empty() {
            logok(format!("Using cached draft: {}", draft_path.display()));
            return Ok(text);
        }
        logw(format!("Cached draft is empty, regenerating: {}", draft_path.display()));
    }

    let uri = upload_video(client, cfg, video).await?;
    let text = generator.generate(&uri, &cfg.prompt).await?;
    fs::write(draft_path, &text)
        .await
        .with_context(|| format!("write draft: {}", draft_path.display()))?;
    logok(format!("Saved draft: {}", draft_path.display()));
    Ok(text)
}

/// Builds `output/<title>.docx`. Returns whether any step made it into the document.
pub async fn process_video(
    cfg: &Config,
    client: &reqwest::Client,
    generator: &dyn DraftGenerator,
    video: &Path,
    title: &str,
) -> Result<bool> {
    ensure_dir(Path::new(OUTPUT_DIR)).await?;
    ensure_dir(Path::new(DRAFTS_DIR)).await?;

    let draft_path = PathBuf::from(DRAFTS_DIR).join(format!("{}.md", title));
    let out_docx = PathBuf::from(OUTPUT_DIR).join(format!("{}.docx", title));

    let draft = obtain_draft(cfg, client, generator, video, &draft_path).await?;
    let assembly = build_from_draft(cfg, video, draft, frame_extractor(cfg), &out_docx).await?;
    // a text-only document means the draft had no usable steps
    Ok(assembly.document.images().next().is_some() || assembly.is_partial())
}

fn list_videos(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(OsStr::to_str)
                    .map(|s| s.eq_ignore_ascii_case("mp4"))
                    == Some(true)
        })
        .collect();
    out.sort();
    out
}

/// Logs the result for one video and reports whether it counts as processed. A
/// document without steps was still written, so it counts and gets flagged.
fn record_outcome(title: &str, outcome: &Result<bool>) -> bool {
    match outcome {
        Ok(true) => {
            logok(format!("DONE: {}", title));
            true
        }
        Ok(false) => {
            logw(format!("DONE without steps: {} (text-only document)", title));
            true
        }
        Err(err) => {
            logw(format!("FAILED: {} ({:#})", title, err));
            false
        }
    }
}

fn output_already_exists(title: &str) -> bool {
    PathBuf::from(OUTPUT_DIR)
        .join(format!("{}.docx", title))
        .exists()
}

/// Processes every `.mp4` in `videos/` that has no document yet.
pub async fn run_generation(cfg: &Config) -> Result<i32> {
    cfg.validate_remote()?;
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let generator = VertexClient::new(client.clone(), cfg.clone());

    ensure_dir(Path::new(VIDEOS_DIR)).await?;
    ensure_dir(Path::new(OUTPUT_DIR)).await?;
    ensure_dir(Path::new(DRAFTS_DIR)).await?;

    let mut processed = 0;
    for video in list_videos(Path::new(VIDEOS_DIR)) {
        let title = strip_ext(&video);
        if output_already_exists(&title) {
            logi(format!("Skipping {} (already in {}/)", title, OUTPUT_DIR));
            continue;
        }

        logi(format!("=== Processing: {} ===", title));
        let outcome = process_video(cfg, &client, &generator, &video, &title).await;
        if record_outcome(&title, &outcome) {
            processed += 1;
        }
    }

    logi(format!("All done. Processed: {}", processed));
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_mp4_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mp4", "a.MP4", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.mp4")).unwrap();

        let names: Vec<String> = list_videos(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MP4", "b.mp4"]);
    }

    #[test]
    fn text_only_documents_count_as_processed() {
        assert!(record_outcome("line-1", &Ok(true)));
        assert!(record_outcome("line-2", &Ok(false)));
        assert!(!record_outcome("line-3", &Err(anyhow::anyhow!("upload refused"))));
    }

    #[test]
    fn options_follow_config() {
        let mut cfg = Config::default();
        cfg.document_title = "Carton Line 3".to_string();
        cfg.image_width_inches = 4.5;
        let opts = assemble_options(&cfg);
        assert_eq!(opts.title, "Carton Line 3");
        assert_eq!(opts.image_width_inches, 4.5);
        assert_eq!(strip_ext(Path::new("videos/Carton Line 3.mp4")), "Carton Line 3");
    }
}
