use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use dailybrief_common::config::SimpleFetcherConfig;
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::sources::feed_util::within_days;
use crate::traits::Fetcher;

const API_URL: &str = "https://huggingface.co/api/daily_papers";
const PAPER_URL: &str = "https://huggingface.co/papers";
const DAYS_BACK: i64 = 2;

/// HuggingFace daily-papers adapter.
pub struct HuggingfaceFetcher {
    config: SimpleFetcherConfig,
    client: reqwest::Client,
}

impl HuggingfaceFetcher {
    pub fn new(config: SimpleFetcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let data: Value = self
            .client
            .get(API_URL)
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let now = Utc::now();
        let articles: Vec<Article> = data
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|item| parse_paper(item, now))
            .take(self.config.max_results)
            .collect();

        info!(count = articles.len(), "HuggingFace fetch complete");
        Ok(articles)
    }
}

fn parse_paper(item: &Value, now: DateTime<Utc>) -> Option<Article> {
    let paper = &item["paper"];
    let id = paper["id"].as_str()?;
    let title = paper["title"].as_str()?.trim().to_string();

    let published = item["publishedAt"]
        .as_str()
        .or_else(|| paper["publishedAt"].as_str())
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|d| d.with_timezone(&Utc));
    if !within_days(published, DAYS_BACK, now) {
        return None;
    }

    let authors: Vec<String> = paper["authors"]
        .as_array()
        .map(|authors| {
            authors
                .iter()
                .filter_map(|a| a["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let mut article = Article::new(
        title,
        format!("{PAPER_URL}/{id}"),
        "HuggingFace Papers",
        SourceType::Huggingface,
    )
    .with_published_date(
        published
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
    )
    .with_content(paper["summary"].as_str().unwrap_or_default().to_string());
    if !authors.is_empty() {
        article
            .extras
            .insert("authors".into(), Value::String(authors.join(", ")));
    }
    if let Some(upvotes) = paper["upvotes"].as_i64() {
        article.extras.insert("upvotes".into(), serde_json::json!(upvotes));
    }
    Some(article)
}

#[async_trait]
impl Fetcher for HuggingfaceFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("HuggingFace Papers", SourceType::Huggingface, items),
            Err(e) => {
                FetchResult::failed("HuggingFace Papers", SourceType::Huggingface, e.to_string())
            }
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "HuggingFace Papers"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Huggingface
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_paper_builds_paper_url() {
        let now = Utc::now();
        let item = serde_json::json!({
            "publishedAt": now.to_rfc3339(),
            "paper": {
                "id": "2405.12345",
                "title": "Scaling Laws for Widgets",
                "summary": "We study widgets.",
                "upvotes": 12,
                "authors": [{"name": "Alice"}, {"name": "Bob"}]
            }
        });
        let article = parse_paper(&item, now).unwrap();
        assert_eq!(article.url, "https://huggingface.co/papers/2405.12345");
        assert_eq!(article.extra_str("authors"), Some("Alice, Bob"));
        assert_eq!(article.content, "We study widgets.");
    }

    #[test]
    fn parse_paper_drops_stale_entries() {
        let now = Utc::now();
        let item = serde_json::json!({
            "publishedAt": (now - chrono::Duration::days(30)).to_rfc3339(),
            "paper": {"id": "1", "title": "Old"}
        });
        assert!(parse_paper(&item, now).is_none());
    }
}
