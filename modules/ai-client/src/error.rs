use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiClientError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Client error ({status}): {body}")]
    Client { status: u16, body: String },

    #[error("Empty response from provider")]
    EmptyResponse,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl AiClientError {
    /// Whether a retry can reasonably succeed: timeouts, connection failures,
    /// 5xx and 429. Other 4xx fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connect(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }
}

impl From<reqwest::Error> for AiClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
