use async_trait::async_trait;

use dailybrief_common::Article;

/// Optional subjective filter applied before scoring and push. The default is
/// the identity selector; an LLM-backed implementation plugs in behind the
/// same trait without touching the pusher.
#[async_trait]
pub trait SmartSelector: Send + Sync {
    async fn select(&self, articles: Vec<Article>) -> Vec<Article>;
}

/// Pass-through selection.
pub struct IdentitySelector;

#[async_trait]
impl SmartSelector for IdentitySelector {
    async fn select(&self, articles: Vec<Article>) -> Vec<Article> {
        articles
    }
}
