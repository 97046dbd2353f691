use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use ai_client::ChatAgent;
use dailybrief_common::text::{ellipsize, take_chars};
use dailybrief_common::{Article, CATEGORIES, FALLBACK_CATEGORY};

/// Content passed to the model is capped to keep prompts bounded.
const MAX_PROMPT_CONTENT_CHARS: usize = 6000;

const ENRICH_SYSTEM_PROMPT: &str = "你是一个技术内容分析助手。对给定的文章，输出三个带标签的部分，格式严格如下：

SUMMARY: <一段简洁的英文摘要，2-3句>
CATEGORY: <从以下分类中选择一个：AI安全、系统安全、网络安全、密码学、软件安全、AI技术、其他>
ZH_SUMMARY: <中文摘要，2-3句>

只输出这三行，不要输出其他内容。";

const SCORE_SYSTEM_PROMPT: &str = "你是一个内容评估助手。评估给定文章对安全研究人员和AI研究人员的重要性，输出一个 0 到 100 的整数分数。只输出数字。";

/// Per-article enrichment produced by the model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichment {
    pub summary: String,
    pub category: String,
    pub zh_summary: String,
}

/// LLM-backed enrichment: summary, category and translation per article, plus
/// the optional priority signal used by the scorer.
pub struct Enricher {
    agent: Arc<dyn ChatAgent>,
}

impl Enricher {
    pub fn new(agent: Arc<dyn ChatAgent>) -> Self {
        Self { agent }
    }

    /// Generate `{summary, category, zh_summary}` for one article. The model's
    /// reply is parsed line-wise with defaults for missing sections; an
    /// unrecognized category collapses to the fallback bucket.
    pub async fn enrich(&self, title: &str, content: &str) -> Result<Enrichment> {
        let user_prompt = format!(
            "标题: {title}\n\n内容:\n{}",
            take_chars(content, MAX_PROMPT_CONTENT_CHARS)
        );
        let reply = self.agent.chat(ENRICH_SYSTEM_PROMPT, &user_prompt).await?;
        debug!(title = %ellipsize(title, 40), "Article enriched");
        Ok(parse_enrichment(&reply))
    }

    /// Model-assigned priority in [0, 100], or None when the reply carries no
    /// usable number.
    pub async fn score_priority(&self, article: &Article) -> Option<u8> {
        let user_prompt = format!(
            "标题: {}\n来源: {}\n摘要: {}",
            article.title,
            article.source,
            ellipsize(&article.summary, 500)
        );
        match self.agent.chat(SCORE_SYSTEM_PROMPT, &user_prompt).await {
            Ok(reply) => parse_score(&reply),
            Err(e) => {
                warn!(url = %article.url, error = %e, "Priority scoring call failed");
                None
            }
        }
    }
}

/// Parse the labelled-section reply. Unknown categories collapse to the
/// fallback; missing sections stay empty.
pub(crate) fn parse_enrichment(reply: &str) -> Enrichment {
    let mut enrichment = Enrichment::default();

    for line in reply.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("SUMMARY:") {
            enrichment.summary = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("CATEGORY:") {
            enrichment.category = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("ZH_SUMMARY:") {
            enrichment.zh_summary = rest.trim().to_string();
        }
    }

    if !CATEGORIES.contains(&enrichment.category.as_str()) {
        enrichment.category = FALLBACK_CATEGORY.to_string();
    }

    enrichment
}

/// First integer in the reply, clamped to [0, 100].
pub(crate) fn parse_score(reply: &str) -> Option<u8> {
    let digits: String = reply
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u32>().ok().map(|n| n.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_enrichment_reads_all_sections() {
        let reply = "SUMMARY: A new RCE technique.\nCATEGORY: 软件安全\nZH_SUMMARY: 一种新的远程代码执行技术。";
        let e = parse_enrichment(reply);
        assert_eq!(e.summary, "A new RCE technique.");
        assert_eq!(e.category, "软件安全");
        assert_eq!(e.zh_summary, "一种新的远程代码执行技术。");
    }

    #[test]
    fn unknown_category_collapses_to_fallback() {
        let e = parse_enrichment("SUMMARY: x\nCATEGORY: Quantum Baking\nZH_SUMMARY: y");
        assert_eq!(e.category, FALLBACK_CATEGORY);
    }

    #[test]
    fn missing_sections_default_empty() {
        let e = parse_enrichment("CATEGORY: AI安全");
        assert_eq!(e.summary, "");
        assert_eq!(e.category, "AI安全");
        assert_eq!(e.zh_summary, "");
    }

    #[test]
    fn parse_score_extracts_and_clamps() {
        assert_eq!(parse_score("85"), Some(85));
        assert_eq!(parse_score("评分: 42 分"), Some(42));
        assert_eq!(parse_score("999"), Some(100));
        assert_eq!(parse_score("no number here"), None);
    }
}
