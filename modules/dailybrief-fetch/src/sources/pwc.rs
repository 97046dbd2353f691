use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::info;

use dailybrief_common::config::PwcConfig;
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::traits::Fetcher;

const API_URL: &str = "https://paperswithcode.com/api/v1/papers/";

/// Papers-with-Code latest-papers adapter.
pub struct PwcFetcher {
    config: PwcConfig,
    client: reqwest::Client,
}

impl PwcFetcher {
    pub fn new(config: PwcConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let url = format!(
            "{API_URL}?ordering=-published&items_per_page={}",
            self.config.max_results
        );
        let data: Value = self
            .client
            .get(&url)
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let cutoff = (Utc::now() - chrono::Duration::days(self.config.days_back)).date_naive();
        let articles: Vec<Article> = data["results"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|item| parse_paper(item, cutoff))
            .collect();

        info!(count = articles.len(), "Papers With Code fetch complete");
        Ok(articles)
    }
}

fn parse_paper(item: &Value, cutoff: NaiveDate) -> Option<Article> {
    let title = item["title"].as_str()?.to_string();
    let url = item["url_abs"]
        .as_str()
        .filter(|u| !u.is_empty())
        .map(String::from)
        .or_else(|| {
            item["arxiv_id"]
                .as_str()
                .map(|id| format!("https://arxiv.org/abs/{id}"))
        })?;

    let published = item["published"].as_str().unwrap_or_default();
    if let Ok(date) = NaiveDate::parse_from_str(published, "%Y-%m-%d") {
        if date < cutoff {
            return None;
        }
    }

    let mut article = Article::new(title, url, "Papers With Code", SourceType::Pwc)
        .with_published_date(published.to_string())
        .with_content(item["abstract"].as_str().unwrap_or_default().to_string());
    if let Some(id) = item["arxiv_id"].as_str() {
        article.extras.insert("arxiv_id".into(), Value::String(id.to_string()));
    }
    Some(article)
}

#[async_trait]
impl Fetcher for PwcFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("Papers With Code", SourceType::Pwc, items),
            Err(e) => FetchResult::failed("Papers With Code", SourceType::Pwc, e.to_string()),
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "Papers With Code"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Pwc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_paper_falls_back_to_arxiv_url() {
        let cutoff = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let item = serde_json::json!({
            "title": "A Paper",
            "url_abs": "",
            "arxiv_id": "2401.00001",
            "published": "2024-05-01",
            "abstract": "Abstract text."
        });
        let article = parse_paper(&item, cutoff).unwrap();
        assert_eq!(article.url, "https://arxiv.org/abs/2401.00001");
        assert_eq!(article.extra_str("arxiv_id"), Some("2401.00001"));
    }

    #[test]
    fn parse_paper_respects_cutoff() {
        let cutoff = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let item = serde_json::json!({
            "title": "Old Paper",
            "url_abs": "https://example.com/p",
            "published": "2024-01-01"
        });
        assert!(parse_paper(&item, cutoff).is_none());
    }
}
