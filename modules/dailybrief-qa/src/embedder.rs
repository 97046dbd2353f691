use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use ai_client::{EmbedAgent, OpenAiCompatible};
use dailybrief_common::config::EmbeddingConfig;
use dailybrief_common::text::normalize_whitespace;

// --- TextEmbedder trait ---

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
}

/// Embedding client with a minimum inter-call delay so the provider's rate
/// limit is never hit in the first place. Empty texts inside a batch pass
/// through as empty vectors at their positions.
pub struct EmbeddingClient {
    client: OpenAiCompatible,
    dimension: usize,
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Self {
        let client = OpenAiCompatible::with_timeout(
            &config.api_key,
            &config.model,
            Duration::from_secs(config.timeout_secs),
        )
        .with_base_url(&config.api_base)
        .with_embedding_model(&config.model);
        Self {
            client,
            dimension: config.dimension,
            min_delay: Duration::from_millis(config.rate_limit_delay_ms),
            last_call: Mutex::new(None),
        }
    }

    /// Sleep whatever remains of the inter-call delay. Also serializes calls:
    /// one embedding request in flight at a time.
    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_delay {
                let wait = self.min_delay - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Embedding throttle");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            bail!("Input text cannot be empty");
        }
        let cleaned = normalize_whitespace(text);
        self.throttle().await;
        EmbedAgent::embed(&self.client, &cleaned).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            bail!("Input text list cannot be empty");
        }

        // Keep positions for empty members; embed only the non-empty ones.
        let mut cleaned = Vec::new();
        let mut valid_indices = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            if !text.trim().is_empty() {
                cleaned.push(normalize_whitespace(text));
                valid_indices.push(i);
            }
        }
        if cleaned.is_empty() {
            bail!("All input texts are empty");
        }

        self.throttle().await;
        let embedded = EmbedAgent::embed_batch(&self.client, cleaned).await?;

        let mut out = vec![Vec::new(); texts.len()];
        for (slot, vector) in valid_indices.into_iter().zip(embedded) {
            out[slot] = vector;
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
