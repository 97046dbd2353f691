use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use dailybrief_common::config::RetrievalConfig;

use crate::history::HistoryAwareQueryBuilder;
use crate::knowledge_base::KnowledgeBase;
use crate::models::ConversationTurn;
use crate::vector_index::{DocMetadata, MetadataFilter};

/// Jaccard band inside which the char-3-gram estimate is considered too
/// ambiguous and word-level Jaccard decides instead.
const JACCARD_LOW: f64 = 0.3;
const JACCARD_HIGH: f64 = 0.9;

/// One retrieved chunk after filtering.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub doc_id: String,
    pub content: String,
    pub score: f32,
    pub metadata: DocMetadata,
}

impl ChunkResult {
    /// The owning article id, parsed from `"{article_id}_{chunk_index}"`.
    pub fn article_id(&self) -> &str {
        match self.doc_id.rsplit_once('_') {
            Some((article, _)) => article,
            None => &self.doc_id,
        }
    }
}

/// Retrieval with threshold filtering, per-document caps, near-duplicate
/// removal and diversity-aware ordering on top of the raw vector search.
pub struct EnhancedRetriever {
    kb: Arc<KnowledgeBase>,
    config: RetrievalConfig,
    query_builder: HistoryAwareQueryBuilder,
}

impl EnhancedRetriever {
    pub fn new(kb: Arc<KnowledgeBase>, config: RetrievalConfig) -> Self {
        let query_builder = HistoryAwareQueryBuilder::new(config.max_history_turns);
        Self {
            kb,
            config,
            query_builder,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        history: &[ConversationTurn],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ChunkResult>> {
        if query.trim().is_empty() || n_results == 0 {
            return Ok(Vec::new());
        }

        let enhanced_query =
            self.query_builder
                .build(query, history, Some(self.config.max_history_turns));

        // Overfetch so the filters below still leave enough candidates.
        let raw = self
            .kb
            .search(&enhanced_query, n_results * 3, filter)
            .await?;

        let chunks: Vec<ChunkResult> = raw
            .into_iter()
            .map(|hit| ChunkResult {
                doc_id: hit.doc_id,
                content: hit.content,
                score: hit.score,
                metadata: hit.metadata,
            })
            .collect();

        let before = chunks.len();
        let chunks = filter_by_threshold(chunks, self.config.similarity_threshold);
        let after_threshold = chunks.len();
        let chunks = limit_per_document(chunks, self.config.max_chunks_per_doc);
        let before_dedup = chunks.len();
        let chunks = deduplicate(chunks, self.config.dedup_threshold);
        let deduplicated = before_dedup - chunks.len();
        let mut chunks = sort_with_diversity(chunks);
        chunks.truncate(n_results);

        debug!(
            query,
            history_turns = history.len(),
            before,
            after_threshold,
            deduplicated,
            returned = chunks.len(),
            "Enhanced retrieval complete"
        );

        Ok(chunks)
    }
}

/// Threshold semantics: 0 keeps everything, 1 keeps only exact matches,
/// anything else keeps `score >= threshold`.
fn filter_by_threshold(results: Vec<ChunkResult>, threshold: f32) -> Vec<ChunkResult> {
    if threshold == 0.0 {
        return results;
    }
    if threshold >= 1.0 {
        return results.into_iter().filter(|r| r.score == 1.0).collect();
    }
    results.into_iter().filter(|r| r.score >= threshold).collect()
}

/// Keep each article's top `max_per_doc` chunks by score, preserving the
/// original relative ordering of survivors. 0 disables the cap.
fn limit_per_document(results: Vec<ChunkResult>, max_per_doc: usize) -> Vec<ChunkResult> {
    if max_per_doc == 0 || results.is_empty() {
        return results;
    }

    let mut per_doc: HashMap<String, Vec<(f32, String)>> = HashMap::new();
    for chunk in &results {
        per_doc
            .entry(chunk.article_id().to_string())
            .or_default()
            .push((chunk.score, chunk.doc_id.clone()));
    }

    let mut kept_ids: HashSet<String> = HashSet::new();
    for chunks in per_doc.values_mut() {
        chunks.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        for (_, doc_id) in chunks.iter().take(max_per_doc) {
            kept_ids.insert(doc_id.clone());
        }
    }

    results
        .into_iter()
        .filter(|c| kept_ids.contains(&c.doc_id))
        .collect()
}

/// Walk candidates in score-descending order, keeping a chunk only when its
/// content similarity to every kept chunk stays at or below the threshold.
fn deduplicate(results: Vec<ChunkResult>, threshold: f64) -> Vec<ChunkResult> {
    if results.len() <= 1 {
        return results;
    }

    let mut sorted = results;
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<ChunkResult> = Vec::new();
    for candidate in sorted {
        let is_duplicate = kept
            .iter()
            .any(|k| content_similarity(&candidate.content, &k.content) > threshold);
        if !is_duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Primary order: score descending. Within an equal-score group, round-robin
/// across articles, preferring articles not yet represented in the output.
fn sort_with_diversity(results: Vec<ChunkResult>) -> Vec<ChunkResult> {
    if results.len() <= 1 {
        return results;
    }

    let mut sorted = results;
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut output: Vec<ChunkResult> = Vec::with_capacity(sorted.len());
    let mut seen_sources: HashSet<String> = HashSet::new();

    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j].score == sorted[i].score {
            j += 1;
        }

        if j - i == 1 {
            seen_sources.insert(sorted[i].article_id().to_string());
            output.push(sorted[i].clone());
        } else {
            // Bucket the tied group per article, keeping first-appearance order.
            let mut order: Vec<String> = Vec::new();
            let mut buckets: HashMap<String, VecDeque<ChunkResult>> = HashMap::new();
            for chunk in &sorted[i..j] {
                let article = chunk.article_id().to_string();
                if !buckets.contains_key(&article) {
                    order.push(article.clone());
                }
                buckets.entry(article).or_default().push_back(chunk.clone());
            }

            // Unrepresented articles go first.
            let (fresh, known): (Vec<String>, Vec<String>) =
                order.into_iter().partition(|s| !seen_sources.contains(s));
            let mut ordered = fresh;
            ordered.extend(known);

            loop {
                let mut emitted = false;
                for article in &ordered {
                    if let Some(bucket) = buckets.get_mut(article) {
                        if let Some(chunk) = bucket.pop_front() {
                            seen_sources.insert(article.clone());
                            output.push(chunk);
                            emitted = true;
                        }
                    }
                }
                if !emitted {
                    break;
                }
            }
        }

        i = j;
    }

    output
}

/// Fast content similarity: char-3-gram Jaccard decides outside the
/// ambiguous band; inside it word-level Jaccard settles the call. No
/// embedding round-trips.
fn content_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let jaccard = char_ngram_jaccard(a, b, 3);
    if jaccard < JACCARD_LOW || jaccard > JACCARD_HIGH {
        return jaccard;
    }
    word_jaccard(a, b)
}

fn char_ngram_jaccard(a: &str, b: &str, n: usize) -> f64 {
    let grams_a = char_ngrams(a, n);
    let grams_b = char_ngrams(b, n);
    jaccard(&grams_a, &grams_b)
}

fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text.to_lowercase().trim().chars().collect();
    if chars.len() < n {
        return HashSet::from([chars.iter().collect()]);
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

fn word_jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = tokenize_words(a);
    let words_b: HashSet<String> = tokenize_words(b);
    jaccard(&words_a, &words_b)
}

fn tokenize_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}
