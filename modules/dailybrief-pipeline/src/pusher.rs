use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::info;

use dailybrief_common::text::ellipsize;

use crate::messenger::Messenger;
use crate::scorer::ScoredArticle;

/// Tier labels shown as message titles.
const HIGH_TITLE: &str = "🔥 今日重点推荐";
const MID_TITLE: &str = "📰 今日资讯";
const LOW_TITLE: &str = "📎 其他更新";

/// Score partition of the day's selection.
#[derive(Debug, Default)]
pub struct Tiers {
    pub high: Vec<ScoredArticle>,
    pub mid: Vec<ScoredArticle>,
    pub low: Vec<ScoredArticle>,
}

/// Groups scored articles into tiers and dispatches each tier as batched
/// rich-text messages. Any batch failure fails the whole push so the caller
/// keeps the checkpoint and never marks the articles pushed.
pub struct TieredPusher {
    batch_size: usize,
    high_threshold: u8,
    mid_threshold: u8,
}

impl TieredPusher {
    pub fn new(batch_size: usize, high_threshold: u8, mid_threshold: u8) -> Self {
        Self {
            batch_size: batch_size.max(1),
            high_threshold,
            mid_threshold,
        }
    }

    /// Partition by score: >= high, >= mid, rest.
    pub fn categorize(&self, scored: Vec<ScoredArticle>) -> Tiers {
        let mut tiers = Tiers::default();
        for article in scored {
            if article.score >= self.high_threshold {
                tiers.high.push(article);
            } else if article.score >= self.mid_threshold {
                tiers.mid.push(article);
            } else {
                tiers.low.push(article);
            }
        }
        tiers
    }

    /// Send every non-empty tier in batches.
    pub async fn push_tiered(
        &self,
        messenger: &dyn Messenger,
        chat_id: &str,
        tiers: &Tiers,
    ) -> Result<()> {
        for (title, articles) in [
            (HIGH_TITLE, &tiers.high),
            (MID_TITLE, &tiers.mid),
            (LOW_TITLE, &tiers.low),
        ] {
            if articles.is_empty() {
                continue;
            }
            for batch in articles.chunks(self.batch_size) {
                messenger
                    .send_rich_text(chat_id, title, format_batch(batch))
                    .await
                    .with_context(|| format!("Failed to push tier '{title}'"))?;
            }
        }

        info!(
            high = tiers.high.len(),
            mid = tiers.mid.len(),
            low = tiers.low.len(),
            "Tiered push complete"
        );
        Ok(())
    }
}

/// One rich-text content block per article: numbered title line, optional
/// summary line, then the link.
fn format_batch(batch: &[ScoredArticle]) -> Value {
    let mut paragraphs: Vec<Value> = Vec::new();

    for (i, scored) in batch.iter().enumerate() {
        let article = &scored.article;
        paragraphs.push(json!([
            {"tag": "text", "text": format!("{}. {} [{}]", i + 1, article.title, article.source)}
        ]));

        let summary = if article.zh_summary.is_empty() {
            &article.summary
        } else {
            &article.zh_summary
        };
        if !summary.is_empty() {
            paragraphs.push(json!([
                {"tag": "text", "text": format!("   {}", ellipsize(summary, 200))}
            ]));
        }

        paragraphs.push(json!([
            {"tag": "text", "text": "   "},
            {"tag": "a", "text": "原文链接", "href": article.url}
        ]));
    }

    Value::Array(paragraphs)
}
