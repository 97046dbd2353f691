use anyhow::Result;
use async_trait::async_trait;

use crate::client::OpenAiCompatible;

// =============================================================================
// ChatAgent Trait
// =============================================================================

/// Anything that can answer a (system, user) prompt pair with text. The
/// enricher and the QA engine depend on this seam so tests can stub the model.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

#[async_trait]
impl ChatAgent for OpenAiCompatible {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        Ok(OpenAiCompatible::chat(self, system, user).await?)
    }
}

// =============================================================================
// EmbedAgent Trait
// =============================================================================

#[async_trait]
pub trait EmbedAgent: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl EmbedAgent for OpenAiCompatible {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(OpenAiCompatible::embed(self, text).await?)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(OpenAiCompatible::embed_batch(self, &texts).await?)
    }
}
