use anyhow::Result;
use std::path::Path;
use tokio::fs;

pub const VIDEOS_DIR: &str = "videos";
pub const OUTPUT_DIR: &str = "output";
pub const DRAFTS_DIR: &str = "drafts";

const REQUIRED_DIRS: &[&str] = &[VIDEOS_DIR, OUTPUT_DIR, DRAFTS_DIR];

pub async fn ensure_directories() -> Result<()> {
    for dir in REQUIRED_DIRS {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir).await?;
            tracing::info!("Created directory: {}", dir);
        }
    }
    Ok(())
}

pub async fn check_ffmpeg(binary: &Path) -> bool {
    match tokio::process::Command::new(binary)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_decoder_reports_false() {
        assert!(!check_ffmpeg(Path::new("definitely-not-a-decoder-binary")).await);
    }
}
