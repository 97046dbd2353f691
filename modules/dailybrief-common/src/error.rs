use thiserror::Error;

#[derive(Error, Debug)]
pub enum DailybriefError {
    #[error("Fetch error ({source_name}): {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Enrichment error: {0}")]
    Enrichment(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Push error: {0}")]
    Push(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
