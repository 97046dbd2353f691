use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use dailybrief_common::config::ArxivConfig;
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::sources::feed_util::{fetch_feed, within_days};
use crate::traits::Fetcher;

const API_URL: &str = "https://export.arxiv.org/api/query";

/// arXiv preprint adapter: Atom listing over the configured categories,
/// newest first, with an optional keyword filter on title+abstract.
pub struct ArxivFetcher {
    config: ArxivConfig,
    client: reqwest::Client,
}

impl ArxivFetcher {
    pub fn new(config: ArxivConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn query_url(&self) -> String {
        let cats = self
            .config
            .categories
            .iter()
            .map(|c| format!("cat:{c}"))
            .collect::<Vec<_>>()
            .join("+OR+");
        format!(
            "{API_URL}?search_query={cats}&start=0&max_results={}&sortBy=submittedDate&sortOrder=descending",
            self.config.max_results
        )
    }

    fn matches_keywords(&self, title: &str, abstract_text: &str) -> bool {
        if self.config.keywords.is_empty() {
            return true;
        }
        let haystack = format!("{} {}", title, abstract_text).to_lowercase();
        self.config
            .keywords
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()))
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let entries = fetch_feed(&self.client, &self.query_url(), self.config.max_results).await?;
        let now = Utc::now();

        let articles: Vec<Article> = entries
            .into_iter()
            .filter(|e| within_days(e.published, self.config.days_back, now))
            .filter(|e| self.matches_keywords(&e.title, &e.summary))
            .map(|e| {
                let published = e
                    .published
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                Article::new(e.title, e.url, "arXiv", SourceType::Arxiv)
                    .with_published_date(published)
                    .with_content(e.summary)
            })
            .collect();

        info!(count = articles.len(), "arXiv fetch complete");
        Ok(articles)
    }
}

#[async_trait]
impl Fetcher for ArxivFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("arXiv", SourceType::Arxiv, items),
            Err(e) => FetchResult::failed("arXiv", SourceType::Arxiv, e.to_string()),
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "arXiv"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Arxiv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_url_joins_categories() {
        let config = ArxivConfig {
            categories: vec!["cs.CR".into(), "cs.AI".into()],
            max_results: 25,
            ..ArxivConfig::default()
        };
        let url = ArxivFetcher::new(config).query_url();
        assert!(url.contains("cat:cs.CR+OR+cat:cs.AI"));
        assert!(url.contains("max_results=25"));
        assert!(url.contains("sortOrder=descending"));
    }

    #[test]
    fn keyword_filter_is_case_insensitive() {
        let config = ArxivConfig {
            keywords: vec!["LLM".into(), "fuzzing".into()],
            ..ArxivConfig::default()
        };
        let f = ArxivFetcher::new(config);
        assert!(f.matches_keywords("Fuzzing the kernel", ""));
        assert!(f.matches_keywords("A study", "large llm agents"));
        assert!(!f.matches_keywords("Unrelated paper", "about graphs"));
    }

    #[test]
    fn empty_keyword_list_matches_everything() {
        let f = ArxivFetcher::new(ArxivConfig::default());
        assert!(f.matches_keywords("anything", "at all"));
    }
}
