use std::time::Duration;

use tracing::debug;

use crate::error::AiClientError;
use crate::retry::RetryPolicy;
use crate::types::*;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

/// Chat + embeddings client for any endpoint speaking the OpenAI wire format.
#[derive(Clone)]
pub struct OpenAiCompatible {
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiCompatible {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::with_timeout(api_key, model, Duration::from_secs(120))
    }

    pub fn with_timeout(api_key: &str, model: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.to_string(),
            base_url: DEFAULT_API_URL.to_string(),
            model: model.to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            http,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion: system + user, assistant text back.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, AiClientError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![WireMessage::system(system), WireMessage::user(user)],
            temperature: Some(0.2),
        };
        let url = format!("{}/chat/completions", self.base_url);

        self.retry
            .run("chat", || {
                let request = request.clone();
                let url = url.clone();
                async move {
                    debug!(model = %request.model, "chat request");
                    let response = self
                        .http
                        .post(&url)
                        .bearer_auth(&self.api_key)
                        .json(&request)
                        .send()
                        .await?;
                    let response = Self::check_status(response).await?;
                    let parsed: ChatResponse =
                        response.json().await.map_err(AiClientError::from)?;
                    parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .filter(|s| !s.is_empty())
                        .ok_or(AiClientError::EmptyResponse)
                }
            })
            .await
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AiClientError> {
        if text.trim().is_empty() {
            return Err(AiClientError::InvalidInput("empty text".into()));
        }
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: serde_json::Value::String(text.to_string()),
        };
        let mut vectors = self.embed_request(&request).await?;
        vectors
            .pop()
            .filter(|v| !v.is_empty())
            .ok_or(AiClientError::EmptyResponse)
    }

    /// Embed a batch. The result is ordered by the request positions even when
    /// the provider returns data out of order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AiClientError> {
        if texts.is_empty() {
            return Err(AiClientError::InvalidInput("empty batch".into()));
        }
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: serde_json::Value::Array(
                texts
                    .iter()
                    .map(|t| serde_json::Value::String(t.clone()))
                    .collect(),
            ),
        };
        let vectors = self.embed_request(&request).await?;
        if vectors.len() != texts.len() {
            return Err(AiClientError::Transport(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    async fn embed_request(
        &self,
        request: &EmbeddingRequest,
    ) -> Result<Vec<Vec<f32>>, AiClientError> {
        let url = format!("{}/embeddings", self.base_url);

        self.retry
            .run("embed", || {
                let request = request.clone();
                let url = url.clone();
                async move {
                    let response = self
                        .http
                        .post(&url)
                        .bearer_auth(&self.api_key)
                        .json(&request)
                        .send()
                        .await?;
                    let response = Self::check_status(response).await?;
                    let parsed: EmbeddingResponse =
                        response.json().await.map_err(AiClientError::from)?;
                    Ok(reorder_by_index(parsed.data))
                }
            })
            .await
    }

    async fn check_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, AiClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AiClientError::RateLimited { retry_after });
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            Err(AiClientError::Server {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(AiClientError::Client {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Sort batch embedding data into request order using the response index field.
fn reorder_by_index(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_restores_request_order() {
        let data = vec![
            EmbeddingData {
                embedding: vec![2.0],
                index: 2,
            },
            EmbeddingData {
                embedding: vec![0.0],
                index: 0,
            },
            EmbeddingData {
                embedding: vec![1.0],
                index: 1,
            },
        ];
        let ordered = reorder_by_index(data);
        assert_eq!(ordered, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let c = OpenAiCompatible::new("k", "m").with_base_url("https://api.example.com/v1/");
        assert_eq!(c.base_url, "https://api.example.com/v1");
    }
}
