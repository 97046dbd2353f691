use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::AiClientError;

/// Exponential backoff for provider calls: initial 1 s, doubling, 3 attempts.
/// 429 responses carrying Retry-After wait that long instead of the backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-retryable error, or all
    /// attempts are used up.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AiClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AiClientError>>,
    {
        let mut delay = self.initial_delay;

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let wait = match &e {
                        AiClientError::RateLimited {
                            retry_after: Some(after),
                        } => *after,
                        _ => delay,
                    };
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_secs = wait.as_secs(),
                        error = %e,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay *= self.factor;
                }
                Err(e) => return Err(e),
            }
        }

        // Unreachable: the loop either returns a success or the final error.
        Err(AiClientError::EmptyResponse)
    }
}
