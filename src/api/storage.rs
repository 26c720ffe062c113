use crate::config::Config;
use crate::{logok, logw};
use anyhow::{Context, Result};
use reqwest::Client;
use std::path::Path;
use tokio::fs;

const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1/b";

pub fn object_name_for(local_path: &Path) -> String {
    let file_name = local_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video.mp4".to_string());
    format!("input/{}", file_name)
}

/// Uploads the local video to the configured bucket and returns its `gs://` URI.
pub async fn upload_video(client: &Client, cfg: &Config, local_path: &Path) -> Result<String> {
    let object = object_name_for(local_path);
    let bytes = fs::read(local_path)
        .await
        .with_context(|| format!("Failed to read video: {}", local_path.display()))?;

    let url = format!("{}/{}/o", UPLOAD_BASE, cfg.gcp.bucket);
    let resp = client
        .post(url)
        .query(&[("uploadType", "media"), ("name", object.as_str())])
        .bearer_auth(&cfg.gcp.access_token)
        .header("Content-Type", "video/mp4")
        .body(bytes)
        .timeout(cfg.generation_timeout())
        .send()
        .await
        .context("Cloud Storage upload failed")?;

    let status = resp.status();
    if !status.is_success() {
        let raw = resp.text().await.unwrap_or_default();
        let snippet = raw.chars().take(800).collect::<String>();
        logw(format!("Cloud Storage HTTP {}: {}", status.as_u16(), snippet));
        anyhow::bail!("Failed to upload video: HTTP {}", status.as_u16());
    }

    let uri = format!("gs://{}/{}", cfg.gcp.bucket, object);
    logok(format!("Uploaded to {}", uri));
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_live_under_input() {
        assert_eq!(object_name_for(Path::new("/tmp/x/line 3.mp4")), "input/line 3.mp4");
        assert_eq!(object_name_for(Path::new("/")), "input/video.mp4");
    }
}
