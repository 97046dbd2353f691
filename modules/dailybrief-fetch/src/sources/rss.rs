use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use dailybrief_common::config::{FeedSpec, RssConfig};
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::sources::feed_util::{fetch_feed, within_days};
use crate::traits::Fetcher;

/// Parallelism for sub-feed fetches within this adapter.
const FEED_CONCURRENCY: usize = 4;

/// Callback invoked when one sub-feed finishes: (feed_url, feed_name, articles).
pub type FeedDoneFn = dyn Fn(&str, &str, &[Article]) + Send + Sync;
/// Callback invoked when one sub-feed fails: (feed_url, error).
pub type FeedFailedFn = dyn Fn(&str, &str) + Send + Sync;

/// Subscription-feed adapter. Emits title/link/date records; article bodies are
/// filled in later by the content processor. The per-sub-feed progress hooks
/// exist so the fetch checkpoint can resume mid-way through the feed list.
pub struct RssFetcher {
    config: RssConfig,
    client: reqwest::Client,
}

impl RssFetcher {
    pub fn new(config: RssConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub fn feeds(&self) -> &[FeedSpec] {
        &self.config.feeds
    }

    async fn fetch_one(&self, spec: &FeedSpec) -> anyhow::Result<Vec<Article>> {
        let entries = fetch_feed(&self.client, &spec.url, self.config.max_items_per_feed).await?;
        let now = Utc::now();

        let articles = entries
            .into_iter()
            .filter(|e| within_days(e.published, self.config.days_back, now))
            .filter(|e| !e.title.is_empty())
            .map(|e| {
                let published = e
                    .published
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                Article::new(e.title, e.url, spec.name.clone(), SourceType::Rss)
                    .with_published_date(published)
            })
            .collect();

        Ok(articles)
    }

    /// Fetch the given sub-feeds with bounded parallelism, reporting each
    /// completion/failure through the callbacks. Used by the scheduler's
    /// checkpointed fetch path.
    pub async fn fetch_with_progress(
        &self,
        feeds: &[FeedSpec],
        on_done: Arc<FeedDoneFn>,
        on_failed: Arc<FeedFailedFn>,
    ) -> Vec<Article> {
        let results: Vec<Vec<Article>> = stream::iter(feeds.iter().cloned())
            .map(|spec| {
                let on_done = Arc::clone(&on_done);
                let on_failed = Arc::clone(&on_failed);
                async move {
                    match self.fetch_one(&spec).await {
                        Ok(articles) => {
                            on_done.as_ref()(&spec.url, &spec.name, &articles);
                            articles
                        }
                        Err(e) => {
                            warn!(feed = %spec.url, error = %e, "Failed to fetch feed");
                            on_failed.as_ref()(&spec.url, &e.to_string());
                            Vec::new()
                        }
                    }
                }
            })
            .buffer_unordered(FEED_CONCURRENCY)
            .collect()
            .await;

        let articles: Vec<Article> = results.into_iter().flatten().collect();
        info!(
            feeds = feeds.len(),
            articles = articles.len(),
            "RSS fetch with progress complete"
        );
        articles
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    async fn fetch(&self) -> FetchResult {
        let mut all = Vec::new();
        let mut errors = Vec::new();

        let results: Vec<(FeedSpec, anyhow::Result<Vec<Article>>)> =
            stream::iter(self.config.feeds.iter().cloned())
                .map(|spec| async move {
                    let result = self.fetch_one(&spec).await;
                    (spec, result)
                })
                .buffer_unordered(FEED_CONCURRENCY)
                .collect()
                .await;

        for (spec, result) in results {
            match result {
                Ok(articles) => all.extend(articles),
                Err(e) => errors.push(format!("{}: {e}", spec.name)),
            }
        }

        if all.is_empty() && !errors.is_empty() {
            FetchResult::failed("RSS", SourceType::Rss, errors.join("; "))
        } else {
            let mut result = FetchResult::ok("RSS", SourceType::Rss, all);
            if !errors.is_empty() {
                result.error = Some(errors.join("; "));
            }
            result
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled && !self.config.feeds.is_empty()
    }

    fn source_name(&self) -> &str {
        "RSS"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Rss
    }
}
