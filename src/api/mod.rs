use anyhow::Result;
use async_trait::async_trait;

pub mod storage;
pub mod vertex;

/// Remote multimodal model that turns a stored video and a prompt into a draft.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate(&self, video_uri: &str, prompt: &str) -> Result<String>;
}
