use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::info;

use dailybrief_common::config::{DblpConfig, FeedSpec};
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::traits::Fetcher;

const API_URL: &str = "https://dblp.org/search/publ/api";
const STREAM_CONCURRENCY: usize = 4;

/// DBLP conference-index adapter: one sub-query per configured conference
/// stream, fetched in parallel. Per-stream failures aggregate into one error
/// string without dropping the successful streams.
pub struct DblpFetcher {
    config: DblpConfig,
    client: reqwest::Client,
}

impl DblpFetcher {
    pub fn new(config: DblpConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    async fn fetch_stream(&self, spec: &FeedSpec, year: i32) -> anyhow::Result<Vec<Article>> {
        let url = format!(
            "{API_URL}?q=stream%3A{}%3A&h={}&format=json",
            spec.url.replace('/', "%2F"),
            self.config.max_results
        );

        let resp = self
            .client
            .get(&url)
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?;
        let data: Value = resp.json().await?;

        let hits = data["result"]["hits"]["hit"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let articles: Vec<Article> = hits
            .iter()
            .filter_map(|hit| {
                let hit_info = &hit["info"];
                let title = hit_info["title"].as_str()?.trim_end_matches('.').to_string();
                let url = hit_info["ee"]
                    .as_str()
                    .or_else(|| hit_info["url"].as_str())?
                    .to_string();
                // Only the current publication year is interesting for a daily run.
                let hit_year: i32 = hit_info["year"].as_str().and_then(|y| y.parse().ok())?;
                if hit_year != year {
                    return None;
                }

                let authors = parse_authors(&hit_info["authors"]["author"]);
                let mut article =
                    Article::new(title, url, spec.name.clone(), SourceType::Dblp)
                        .with_published_date(format!("{hit_year}"));
                if !authors.is_empty() {
                    article
                        .extras
                        .insert("authors".into(), Value::String(authors.join(", ")));
                }
                article.extras.insert(
                    "venue".into(),
                    hit_info["venue"].clone(),
                );
                Some(article)
            })
            .collect();

        info!(stream = %spec.name, count = articles.len(), "DBLP stream fetched");
        Ok(articles)
    }

    async fn run(&self) -> (Vec<Article>, Vec<String>) {
        let year = Utc::now().year();
        let results: Vec<(FeedSpec, anyhow::Result<Vec<Article>>)> =
            stream::iter(self.config.streams.iter().cloned())
                .map(|spec| async move {
                    let result = self.fetch_stream(&spec, year).await;
                    (spec, result)
                })
                .buffer_unordered(STREAM_CONCURRENCY)
                .collect()
                .await;

        let mut articles = Vec::new();
        let mut errors = Vec::new();
        for (spec, result) in results {
            match result {
                Ok(items) => articles.extend(items),
                Err(e) => errors.push(format!("{}: {e}", spec.name)),
            }
        }
        (articles, errors)
    }
}

fn parse_authors(value: &Value) -> Vec<String> {
    match value {
        Value::Array(authors) => authors
            .iter()
            .filter_map(|a| a["text"].as_str().map(String::from))
            .collect(),
        Value::Object(_) => value["text"]
            .as_str()
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Fetcher for DblpFetcher {
    async fn fetch(&self) -> FetchResult {
        let (items, errors) = self.run().await;
        if items.is_empty() && !errors.is_empty() {
            FetchResult::failed("DBLP", SourceType::Dblp, errors.join("; "))
        } else {
            let mut result = FetchResult::ok("DBLP", SourceType::Dblp, items);
            if !errors.is_empty() {
                result.error = Some(errors.join("; "));
            }
            result
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "DBLP"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Dblp
    }
}
