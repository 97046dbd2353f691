// Vendor research pages without a proper feed: a JSON listing (Hunyuan) and
// two HTML index pages (Anthropic red team, Atum) handled by link extraction.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use dailybrief_common::config::SimpleFetcherConfig;
use dailybrief_common::{Article, FetchResult, SourceType};

use crate::traits::Fetcher;

fn build_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

/// Extract `(href, anchor_text)` pairs whose resolved URL contains `pattern`.
/// Relative hrefs resolve against `base_url`; results are deduped and capped.
pub(crate) fn extract_links(
    html: &str,
    base_url: &str,
    pattern: &str,
    cap: usize,
) -> Vec<(String, String)> {
    let link_re = regex::Regex::new(r#"(?s)<a\s[^>]*href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid regex");
    let tag_re = regex::Regex::new(r"<[^>]+>").expect("valid regex");
    let base = url::Url::parse(base_url).ok();

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for cap_groups in link_re.captures_iter(html) {
        let raw = &cap_groups[1];
        let resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw.to_string()
        } else if let Some(ref b) = base {
            match b.join(raw) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        } else {
            continue;
        };

        if !resolved.contains(pattern) || !seen.insert(resolved.clone()) {
            continue;
        }

        let text = tag_re
            .replace_all(&cap_groups[2], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        links.push((resolved, text));
        if links.len() >= cap {
            break;
        }
    }

    links
}

// =============================================================================
// Hunyuan research listing (JSON API)
// =============================================================================

const HUNYUAN_API: &str = "https://api.hunyuan.tencent.com/api/blog/publicList";
const HUNYUAN_SITE: &str = "https://hy.tencent.com/research";

pub struct HunyuanFetcher {
    config: SimpleFetcherConfig,
    client: reqwest::Client,
}

impl HunyuanFetcher {
    pub fn new(config: SimpleFetcherConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let page_size = self.config.max_results.to_string();
        let data: Value = self
            .client
            .get(HUNYUAN_API)
            .query(&[("pageNum", "1"), ("pageSize", page_size.as_str())])
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // The listing shape has drifted before; accept the known containers.
        let items = data["data"]["list"]
            .as_array()
            .or_else(|| data["data"].as_array())
            .or_else(|| data["list"].as_array())
            .cloned()
            .unwrap_or_default();

        let articles: Vec<Article> = items
            .iter()
            .filter_map(parse_hunyuan_item)
            .take(self.config.max_results)
            .collect();
        info!(count = articles.len(), "Hunyuan fetch complete");
        Ok(articles)
    }
}

fn parse_hunyuan_item(item: &Value) -> Option<Article> {
    let title = item["title"].as_str()?.trim().to_string();
    let url = item["link"]
        .as_str()
        .or_else(|| item["url"].as_str())
        .filter(|u| !u.is_empty())
        .map(String::from)
        .or_else(|| {
            item["id"]
                .as_str()
                .map(String::from)
                .or_else(|| item["id"].as_i64().map(|id| id.to_string()))
                .map(|id| format!("{HUNYUAN_SITE}/{id}"))
        })?;

    let published = item["publishTime"]
        .as_str()
        .or_else(|| item["publish_time"].as_str())
        .unwrap_or_default()
        .chars()
        .take(10)
        .collect::<String>();

    Some(
        Article::new(title, url, "Hunyuan Research", SourceType::Hunyuan)
            .with_published_date(published)
            .with_content(
                item["brief"]
                    .as_str()
                    .or_else(|| item["desc"].as_str())
                    .unwrap_or_default()
                    .to_string(),
            ),
    )
}

#[async_trait]
impl Fetcher for HunyuanFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("Hunyuan Research", SourceType::Hunyuan, items),
            Err(e) => FetchResult::failed("Hunyuan Research", SourceType::Hunyuan, e.to_string()),
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "Hunyuan Research"
    }

    fn source_type(&self) -> SourceType {
        SourceType::Hunyuan
    }
}

// =============================================================================
// Anthropic red-team index (HTML)
// =============================================================================

const ANTHROPIC_RED_BASE: &str = "https://red.anthropic.com";

pub struct AnthropicRedFetcher {
    config: SimpleFetcherConfig,
    client: reqwest::Client,
}

impl AnthropicRedFetcher {
    pub fn new(config: SimpleFetcherConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let html = self
            .client
            .get(ANTHROPIC_RED_BASE)
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let articles: Vec<Article> =
            extract_links(&html, ANTHROPIC_RED_BASE, "red.anthropic.com/", self.config.max_results)
                .into_iter()
                .filter(|(url, title)| !title.is_empty() && url != ANTHROPIC_RED_BASE)
                .map(|(url, title)| {
                    Article::new(title, url, "Anthropic Red Team", SourceType::AnthropicRed)
                })
                .collect();

        info!(count = articles.len(), "Anthropic red-team fetch complete");
        Ok(articles)
    }
}

#[async_trait]
impl Fetcher for AnthropicRedFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("Anthropic Red Team", SourceType::AnthropicRed, items),
            Err(e) => {
                FetchResult::failed("Anthropic Red Team", SourceType::AnthropicRed, e.to_string())
            }
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "Anthropic Red Team"
    }

    fn source_type(&self) -> SourceType {
        SourceType::AnthropicRed
    }
}

// =============================================================================
// Atum blog index (HTML)
// =============================================================================

const ATUM_BASE: &str = "https://atum.li/cn/";

pub struct AtumBlogFetcher {
    config: SimpleFetcherConfig,
    client: reqwest::Client,
}

impl AtumBlogFetcher {
    pub fn new(config: SimpleFetcherConfig) -> Self {
        let client = build_client(config.timeout_secs);
        Self { config, client }
    }

    async fn run(&self) -> anyhow::Result<Vec<Article>> {
        let html = self
            .client
            .get(ATUM_BASE)
            .header("User-Agent", "dailybrief/0.1")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let articles: Vec<Article> =
            extract_links(&html, ATUM_BASE, "atum.li/cn/", self.config.max_results)
                .into_iter()
                .filter(|(url, title)| !title.is_empty() && url.trim_end_matches('/') != ATUM_BASE.trim_end_matches('/'))
                .map(|(url, title)| Article::new(title, url, "Atum Blog", SourceType::AtumBlog))
                .collect();

        info!(count = articles.len(), "Atum blog fetch complete");
        Ok(articles)
    }
}

#[async_trait]
impl Fetcher for AtumBlogFetcher {
    async fn fetch(&self) -> FetchResult {
        match self.run().await {
            Ok(items) => FetchResult::ok("Atum Blog", SourceType::AtumBlog, items),
            Err(e) => FetchResult::failed("Atum Blog", SourceType::AtumBlog, e.to_string()),
        }
    }

    fn enabled(&self) -> bool {
        self.config.enabled
    }

    fn source_name(&self) -> &str {
        "Atum Blog"
    }

    fn source_type(&self) -> SourceType {
        SourceType::AtumBlog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_links_resolves_relative_hrefs() {
        let html = r#"
            <a href="/cn/post-one/">Post One</a>
            <a href="https://atum.li/cn/post-two/"><span>Post</span> Two</a>
            <a href="https://other.example/x">Elsewhere</a>
            <a href="/cn/post-one/">Post One (dup)</a>
        "#;
        let links = extract_links(html, "https://atum.li/cn/", "atum.li/cn/", 10);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].0, "https://atum.li/cn/post-one/");
        assert_eq!(links[0].1, "Post One");
        assert_eq!(links[1].1, "Post Two");
    }

    #[test]
    fn extract_links_caps_results() {
        let html: String = (0..30)
            .map(|i| format!(r#"<a href="/cn/p{i}/">P{i}</a>"#))
            .collect();
        let links = extract_links(&html, "https://atum.li/cn/", "atum.li/cn/", 5);
        assert_eq!(links.len(), 5);
    }

    #[test]
    fn parse_hunyuan_item_builds_fallback_url() {
        let item = serde_json::json!({
            "title": "混元安全研究",
            "id": 42,
            "publishTime": "2024-05-01 10:00:00",
            "brief": "简介"
        });
        let article = parse_hunyuan_item(&item).unwrap();
        assert_eq!(article.url, "https://hy.tencent.com/research/42");
        assert_eq!(article.published_date, "2024-05-01");
        assert_eq!(article.content, "简介");
    }
}
