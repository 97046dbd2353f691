// Shared RSS/Atom plumbing for the feed-backed adapters.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::info;

pub(crate) struct FeedEntry {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub published: Option<DateTime<Utc>>,
}

/// Fetch and parse one RSS/Atom feed into entries, newest first.
pub(crate) async fn fetch_feed(
    client: &reqwest::Client,
    feed_url: &str,
    max_items: usize,
) -> Result<Vec<FeedEntry>> {
    let resp = client
        .get(feed_url)
        .header("User-Agent", "dailybrief/0.1")
        .send()
        .await
        .context("Feed fetch failed")?;

    let bytes = resp.bytes().await.context("Failed to read feed body")?;
    let feed = feed_rs::parser::parse(&bytes[..]).context("Failed to parse RSS/Atom feed")?;

    let mut entries: Vec<FeedEntry> = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

            let published = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc));

            let summary = entry
                .summary
                .map(|s| s.content)
                .unwrap_or_default();

            Some(FeedEntry {
                url,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                summary,
                published,
            })
        })
        .collect();

    entries.sort_by(|a, b| b.published.cmp(&a.published));
    entries.truncate(max_items);

    info!(feed_url, items = entries.len(), "feed: parsed successfully");
    Ok(entries)
}

/// True when `published` falls within the last `days_back` days (unknown dates
/// pass: the upstream slice is already recent).
pub(crate) fn within_days(
    published: Option<DateTime<Utc>>,
    days_back: i64,
    now: DateTime<Utc>,
) -> bool {
    if days_back <= 0 {
        return true;
    }
    match published {
        Some(date) => date >= now - Duration::days(days_back),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_days_boundaries() {
        let now = Utc::now();
        assert!(within_days(Some(now - Duration::days(1)), 3, now));
        assert!(!within_days(Some(now - Duration::days(5)), 3, now));
        assert!(within_days(None, 3, now));
        assert!(within_days(Some(now - Duration::days(100)), 0, now));
    }
}
