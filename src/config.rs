use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_PROMPT: &str = "You are an operations specialist with a background as a quality control analyst \
and engineering technician in an ISO 9001:2015-regulated manufacturing environment. \
Analyze the provided video (visual and audio) and generate step-by-step work instructions. \
For each step:\n\
- Prefix with a timestamp in [MM:SS] format.\n\
- Include: step number; action description; tools, materials, or components used; and observations.\n\
- If a step is unclear, mark it as [uncertain action].";

const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    #[serde(default)]
    pub project: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_bin: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe_bin: PathBuf,
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_secs: u64,
    #[serde(default)]
    pub frame_width: Option<u32>,
    #[serde(default = "default_concurrency")]
    pub extraction_concurrency: usize,
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_image_width")]
    pub image_width_inches: f32,
    #[serde(default = "default_title")]
    pub document_title: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            location: default_location(),
            bucket: String::new(),
            access_token: String::new(),
            model: default_model(),
        }
    }
}

fn default_location() -> String {
    "us-central1".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash-001".to_string()
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_frame_timeout() -> u64 {
    30
}

fn default_concurrency() -> usize {
    4
}

fn default_generation_timeout() -> u64 {
    600
}

fn default_image_width() -> f32 {
    6.0
}

fn default_title() -> String {
    "Work Instructions".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gcp: GcpConfig::default(),
            prompt: default_prompt(),
            ffmpeg_bin: default_ffmpeg(),
            ffprobe_bin: default_ffprobe(),
            frame_timeout_secs: default_frame_timeout(),
            frame_width: None,
            extraction_concurrency: default_concurrency(),
            generation_timeout_secs: default_generation_timeout(),
            image_width_inches: default_image_width(),
            document_title: default_title(),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid config: {}", path.as_ref().display()))
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if fs::metadata(&path).await.is_ok() {
            return Self::load(path).await;
        }
        Ok(Self::default())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut config: Config = serde_json::from_str(text)?;
        if config.gcp.access_token.is_empty() {
            if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
                config.gcp.access_token = token;
            }
        }
        if config.image_width_inches <= 0.0 {
            anyhow::bail!("config.json: image_width_inches must be positive");
        }
        Ok(config)
    }

    /// Checks the settings the upload and generation calls need.
    pub fn validate_remote(&self) -> Result<()> {
        if self.gcp.project.is_empty() {
            anyhow::bail!("config.json: gcp.project missing");
        }
        if self.gcp.bucket.is_empty() {
            anyhow::bail!("config.json: gcp.bucket missing");
        }
        if self.gcp.access_token.is_empty() {
            anyhow::bail!(
                "config.json: gcp.access_token missing (or set {})",
                ACCESS_TOKEN_ENV
            );
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let cfg = Config::from_json(r#"{"gcp": {"project": "p", "bucket": "b", "access_token": "t"}}"#)
            .unwrap();
        assert_eq!(cfg.gcp.location, "us-central1");
        assert_eq!(cfg.gcp.model, "gemini-2.0-flash-001");
        assert_eq!(cfg.extraction_concurrency, 4);
        assert_eq!(cfg.frame_timeout(), Duration::from_secs(30));
        assert!(cfg.prompt.contains("[MM:SS]"));
        assert!(cfg.validate_remote().is_ok());
    }

    #[test]
    fn remote_validation_names_missing_key() {
        let cfg = Config::from_json(r#"{"gcp": {"project": "p", "access_token": "t"}}"#).unwrap();
        let err = cfg.validate_remote().unwrap_err().to_string();
        assert!(err.contains("gcp.bucket"));
    }

    #[test]
    fn rejects_non_positive_image_width() {
        assert!(Config::from_json(r#"{"image_width_inches": 0}"#).is_err());
    }

    #[test]
    fn gcp_section_is_optional() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.gcp.location, "us-central1");
        assert_eq!(cfg.ffmpeg_bin, PathBuf::from("ffmpeg"));
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("nope.json")).await.unwrap();
        assert_eq!(cfg.document_title, "Work Instructions");
        assert!(Config::load(dir.path().join("nope.json")).await.is_err());
    }
}
