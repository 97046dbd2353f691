use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use dailybrief_common::Article;

use crate::enricher::Enricher;

/// Baseline before weighting.
const BASE_SCORE: f64 = 50.0;

/// An article with its push priority.
#[derive(Debug, Clone)]
pub struct ScoredArticle {
    pub article: Article,
    pub score: u8,
    pub reasons: Vec<String>,
}

/// Priority scoring: source-authority weight times the baseline, optionally
/// blended with a model signal (60% base, 40% model). Scores clamp to [0, 100].
pub struct PriorityScorer {
    weights: HashMap<String, f64>,
    enable_ai_scoring: bool,
    enricher: Option<Arc<Enricher>>,
}

fn default_weights() -> HashMap<String, f64> {
    [
        ("kev", 1.5),
        ("dblp", 1.3),
        ("nvd", 1.2),
        ("huggingface", 1.1),
        ("pwc", 1.1),
        ("blog", 1.0),
        ("arxiv", 1.0),
        ("rss", 0.8),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl PriorityScorer {
    pub fn new(
        overrides: &HashMap<String, f64>,
        enable_ai_scoring: bool,
        enricher: Option<Arc<Enricher>>,
    ) -> Self {
        let mut weights = default_weights();
        for (k, v) in overrides {
            weights.insert(k.clone(), *v);
        }
        Self {
            weights,
            enable_ai_scoring,
            enricher,
        }
    }

    pub async fn score_articles(&self, articles: Vec<Article>) -> Vec<ScoredArticle> {
        let mut scored = Vec::with_capacity(articles.len());
        for article in articles {
            scored.push(self.score_single(article).await);
        }
        if !scored.is_empty() {
            let avg: f64 =
                scored.iter().map(|s| s.score as f64).sum::<f64>() / scored.len() as f64;
            info!(count = scored.len(), avg_score = avg, "Priority scoring complete");
        }
        scored
    }

    pub async fn score_single(&self, article: Article) -> ScoredArticle {
        let mut reasons = Vec::new();

        let weight = self
            .weights
            .get(article.source_type.as_str())
            .copied()
            .unwrap_or(1.0);
        let mut score = BASE_SCORE * weight;
        if (weight - 1.0).abs() > f64::EPSILON {
            reasons.push(format!(
                "source weight {weight:.1}x ({})",
                article.source_type
            ));
        }

        if self.enable_ai_scoring {
            if let Some(enricher) = &self.enricher {
                if let Some(model_score) = enricher.score_priority(&article).await {
                    score = score * 0.6 + model_score as f64 * 0.4;
                    reasons.push(format!("model score {model_score}"));
                }
            }
        }

        ScoredArticle {
            article,
            score: score.clamp(0.0, 100.0).round() as u8,
            reasons,
        }
    }

    /// Non-increasing by score.
    pub fn sort_by_priority(mut scored: Vec<ScoredArticle>) -> Vec<ScoredArticle> {
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dailybrief_common::SourceType;

    fn article(source_type: SourceType) -> Article {
        Article::new("t", "https://a/1", "s", source_type)
    }

    fn scorer() -> PriorityScorer {
        PriorityScorer::new(&HashMap::new(), false, None)
    }

    #[tokio::test]
    async fn kev_outranks_rss() {
        let kev = scorer().score_single(article(SourceType::Kev)).await;
        let rss = scorer().score_single(article(SourceType::Rss)).await;
        assert_eq!(kev.score, 75);
        assert_eq!(rss.score, 40);
        assert!(!kev.reasons.is_empty());
    }

    #[tokio::test]
    async fn neutral_weight_carries_no_reason() {
        let arxiv = scorer().score_single(article(SourceType::Arxiv)).await;
        assert_eq!(arxiv.score, 50);
        assert!(arxiv.reasons.is_empty());
    }

    #[tokio::test]
    async fn overrides_replace_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert("rss".to_string(), 2.0);
        let scorer = PriorityScorer::new(&overrides, false, None);
        let scored = scorer.score_single(article(SourceType::Rss)).await;
        assert_eq!(scored.score, 100);
    }

    #[tokio::test]
    async fn scores_stay_in_bounds_and_sort_descending() {
        let scorer = scorer();
        let mut scored = Vec::new();
        for st in [
            SourceType::Kev,
            SourceType::Rss,
            SourceType::Nvd,
            SourceType::Arxiv,
        ] {
            scored.push(scorer.score_single(article(st)).await);
        }
        let sorted = PriorityScorer::sort_by_priority(scored);
        assert!(sorted.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(sorted.iter().all(|s| s.score <= 100));
    }
}
