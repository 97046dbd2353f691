use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::info;

use dailybrief_common::config::{BlogsConfig, FeedSpec};
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::sources::feed_util::{fetch_feed, within_days};
use crate::traits::Fetcher;

const FEED_CONCURRENCY: usize = 4;
const MAX_ITEMS_PER_FEED: usize = 20;

/// Vendor research-blog adapter: one RSS/Atom endpoint per configured vendor,
/// fetched in parallel. Failures collect into a combined error string.
pub struct BlogFetcher {
    config: BlogsConfig,
    client: reqwest::Client,
}

impl BlogFetcher {
    pub fn new(config: BlogsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn fetch_blog(&self, spec: &FeedSpec) -> anyhow::Result<Vec<Article>> {
        let entries = fetch_feed(&self.client, &spec.url, MAX_ITEMS_PER_FEED).await?;
        let now = Utc::now();

        Ok(entries
            .into_iter()
            .filter(|e| within_days(e.published, self.config.days_back, now))
            .filter(|e| !e.title.is_empty())
            .map(|e| {
                let published = e
                    .published
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                Article::new(e.title, e.url, spec.name.clone(), SourceType::Blog)
                    .with_published_date(published)
                    .with_content(e.summary)
            })
            .collect())
    }
}

#[async_trait]
impl Fetcher for BlogFetcher {
    async fn fetch(&self) -> FetchResult {
        let results: Vec<(FeedSpec, anyhow::Result<Vec<Article>>)> =
            stream::iter(self.config.feeds.iter().cloned())
                .map(|spec| async move {
                    let result = self.fetch_blog(&spec).await;
                    (spec, result)
                })
                .buffer_unordered(FEED_CONCURRENCY)
                .collect()
                .await;

        let mut items = Vec::new();
        let mut errors = Vec::new();
        for (spec, result) in results {
            match result {
                Ok(articles) => items.extend(articles),
                Err(e) => errors.push(format!("{}: {e}", spec.name)),
            }
        }

        info!(items = items.len(), errors = errors.len(), "Blog fetch complete");

        if items.is_empty() && !errors.is_empty() {
            FetchResult::failed("Tech Blogs", SourceType::Blog, errors.join("; "))
        } else {
            let mut result = FetchResult::ok("Tech Blogs", SourceType::Blog, items);
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
        "Tech Blogs"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Blog
    }
}
