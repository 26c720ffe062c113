use crate::api::DraftGenerator;
use crate::config::Config;
use crate::{logi, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

fn generate_url(cfg: &Config) -> String {
    format!(
        "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:generateContent",
        loc = cfg.gcp.location,
        project = cfg.gcp.project,
        model = cfg.gcp.model
    )
}

/// Logs the `error` object of a response body. Returns whether one was present.
fn log_api_error(resp_json: &str) -> bool {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(resp_json) else {
        return false;
    };
    let Some(err) = root.get("error") else {
        return false;
    };
    if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
        logw(format!("Vertex AI error message: {}", msg));
    }
    if let Some(status) = err.get("status").and_then(|v| v.as_str()) {
        logw(format!("Vertex AI error status: {}", status));
    }
    true
}

/// Joins the text parts of the first candidate; `None` on API errors or no text.
fn extract_output_text(resp_json: &str) -> Option<String> {
    if log_api_error(resp_json) {
        return None;
    }
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    let candidate = root.get("candidates")?.as_array()?.first()?;
    if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
        if reason != "STOP" {
            logw(format!("Vertex AI finish reason: {}", reason));
        }
    }

    let parts = candidate.get("content")?.get("parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|v| v.as_str()))
        .collect();
    if text.trim().is_empty() {
        return None;
    }
    Some(text)
}

pub struct VertexClient {
    client: Client,
    cfg: Config,
}

impl VertexClient {
    pub fn new(client: Client, cfg: Config) -> Self {
        Self { client, cfg }
    }
}

#[async_trait]
impl DraftGenerator for VertexClient {
    async fn generate(&self, video_uri: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"fileData": {"fileUri": video_uri, "mimeType": "video/mp4"}},
                    {"text": prompt},
                ],
            }],
        });

        logi(format!("Requesting draft from {} for {}", self.cfg.gcp.model, video_uri));
        let resp = self
            .client
            .post(generate_url(&self.cfg))
            .bearer_auth(&self.cfg.gcp.access_token)
            .json(&body)
            .timeout(self.cfg.generation_timeout())
            .send()
            .await
            .context("Vertex AI request failed")?;

        let status = resp.status();
        let raw = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            logw(format!("Vertex AI HTTP {}", status.as_u16()));
            if !raw.is_empty() {
                let snippet = raw.chars().take(800).collect::<String>();
                logw(format!("Vertex AI raw body: {}", snippet));
            }
            log_api_error(&raw);
            anyhow::bail!("Vertex AI request failed: HTTP {}", status.as_u16());
        }

        let Some(text) = extract_output_text(&raw) else {
            let snippet = raw.chars().take(800).collect::<String>();
            logw(format!("Vertex AI raw body: {}", snippet));
            anyhow::bail!("Vertex AI response had no text");
        };

        logi(format!("Draft received ({} bytes)", text.len()));
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_candidate_text_parts() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"[00:05] Fold"},{"text":" box"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(extract_output_text(raw).as_deref(), Some("[00:05] Fold box"));
    }

    #[test]
    fn error_objects_yield_nothing() {
        let raw = r#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#;
        assert!(extract_output_text(raw).is_none());
        assert!(extract_output_text("not json").is_none());
        assert!(extract_output_text(r#"{"candidates":[]}"#).is_none());
    }

    #[test]
    fn api_errors_are_detected() {
        assert!(log_api_error(r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#));
        assert!(!log_api_error(r#"{"candidates":[]}"#));
        assert!(!log_api_error("<html>bad gateway</html>"));
    }

    #[test]
    fn url_targets_configured_model() {
        let mut cfg = Config::default();
        cfg.gcp.project = "proj".to_string();
        let url = generate_url(&cfg);
        assert!(url.starts_with("https://us-central1-aiplatform.googleapis.com/v1/projects/proj/"));
        assert!(url.ends_with("/models/gemini-2.0-flash-001:generateContent"));
    }
}
