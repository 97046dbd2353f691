use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use dailybrief_common::config::ChunkingConfig;
use dailybrief_common::Article;

use crate::embedder::TextEmbedder;
use crate::vector_index::{DocMetadata, DocRecord, MetadataFilter, SearchHit, VectorIndex};

/// Sentence enders, searched first when choosing a chunk boundary.
const SENTENCE_ENDINGS: &[char] = &['。', '！', '？', '.', '!', '?', '\n'];
/// Clause enders, the fallback.
const CLAUSE_ENDINGS: &[char] = &['；', '，', ';', ',', '：', ':'];

/// Chunked, embedded article storage with filtered nearest-neighbour search.
pub struct KnowledgeBase {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn TextEmbedder>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl KnowledgeBase {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn TextEmbedder>,
        chunking: &ChunkingConfig,
    ) -> Result<Self> {
        if chunking.chunk_size == 0 {
            bail!("chunk_size must be positive");
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            bail!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunking.chunk_overlap,
                chunking.chunk_size
            );
        }
        Ok(Self {
            index,
            embedder,
            chunk_size: chunking.chunk_size,
            chunk_overlap: chunking.chunk_overlap,
        })
    }

    /// Split text into <= chunk_size character pieces, preferring sentence
    /// boundaries and overlapping consecutive chunks by chunk_overlap.
    pub fn chunk_text(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let mut end = (start + self.chunk_size).min(chars.len());

            if end < chars.len() {
                let boundary = find_boundary(&chars, start, end);
                if boundary > start {
                    end = boundary;
                }
            }

            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim().to_string();
            if !chunk.is_empty() {
                chunks.push(chunk);
            }

            if end >= chars.len() {
                break;
            }

            // Step back by the overlap, but always make forward progress.
            let next_start = end.saturating_sub(self.chunk_overlap);
            start = if next_start <= start { end } else { next_start };
        }

        chunks
    }

    /// Chunk, embed and store articles. Articles missing an id or content are
    /// skipped, as are articles whose chunks all embed empty. Returns the
    /// number of chunks stored.
    pub async fn add_articles(&self, articles: &[Article]) -> Result<usize> {
        let mut added = 0usize;

        for article in articles {
            let Some(article_id) = article.id else {
                warn!(url = %article.url, "Skipping article without id");
                continue;
            };
            if article.content.trim().is_empty() {
                warn!(url = %article.url, "Skipping article without content");
                continue;
            }

            let full_text = if article.title.is_empty() {
                article.content.clone()
            } else {
                format!("{}\n\n{}", article.title, article.content)
            };
            let chunks = self.chunk_text(&full_text);
            if chunks.is_empty() {
                continue;
            }

            let embeddings = match self.embedder.embed_batch(&chunks).await {
                Ok(embeddings) => embeddings,
                Err(e) => {
                    warn!(article_id, error = %e, "Failed to embed article chunks");
                    continue;
                }
            };

            let docs: Vec<DocRecord> = chunks
                .into_iter()
                .zip(embeddings)
                .enumerate()
                .filter(|(_, (_, embedding))| !embedding.is_empty())
                .map(|(i, (content, embedding))| DocRecord {
                    doc_id: format!("{article_id}_{i}"),
                    content,
                    embedding,
                    metadata: DocMetadata {
                        article_id,
                        chunk_index: i,
                        title: article.title.clone(),
                        url: article.url.clone(),
                        source_type: article.source_type.as_str().to_string(),
                        published_date: article.published_date.clone(),
                        category: article.category.clone(),
                    },
                })
                .collect();

            if docs.is_empty() {
                warn!(article_id, "All chunks embedded empty, skipping article");
                continue;
            }

            added += docs.len();
            self.index.add(docs).await?;
        }

        info!(chunks = added, "Knowledge base ingest complete");
        Ok(added)
    }

    /// Semantic search. Scores are cosine similarity clamped to [0, 1].
    pub async fn search(
        &self,
        query: &str,
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        self.index.search(&embedding, n_results, filter).await
    }

    pub async fn len(&self) -> usize {
        self.index.len().await
    }

    /// Drop the collection. The caller re-adds articles from the store.
    pub async fn rebuild(&self) -> Result<()> {
        self.index.clear().await?;
        info!("Knowledge base collection recreated");
        Ok(())
    }
}

/// Best split position in `chars[start..end]`: the last sentence ender in the
/// back half of the window, else the last clause ender, else `end` (hard cut).
fn find_boundary(chars: &[char], start: usize, end: usize) -> usize {
    let search_start = start + (end - start) / 2;

    for i in (search_start..end).rev() {
        if SENTENCE_ENDINGS.contains(&chars[i]) {
            return i + 1;
        }
    }
    for i in (search_start..end).rev() {
        if CLAUSE_ENDINGS.contains(&chars[i]) {
            return i + 1;
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::SnapshotIndex;
    use async_trait::async_trait;
    use dailybrief_common::SourceType;
    use tempfile::tempdir;

    /// Deterministic embedder: direction derived from content length parity.
    struct StubEmbedder;

    #[async_trait]
    impl TextEmbedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let n = text.chars().count() as f32;
            Ok(vec![1.0, n % 7.0, (n % 3.0) * 0.5])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                if t.trim().is_empty() {
                    out.push(Vec::new());
                } else {
                    out.push(self.embed(t).await?);
                }
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn kb_with(chunk_size: usize, chunk_overlap: usize, dir: &std::path::Path) -> KnowledgeBase {
        let index = Arc::new(SnapshotIndex::open(dir, "test").unwrap());
        KnowledgeBase::new(
            index,
            Arc::new(StubEmbedder),
            &ChunkingConfig {
                chunk_size,
                chunk_overlap,
            },
        )
        .unwrap()
    }

    #[test]
    fn invalid_chunking_config_is_rejected() {
        let dir = tempdir().unwrap();
        let index = Arc::new(SnapshotIndex::open(dir.path(), "test").unwrap());
        let result = KnowledgeBase::new(
            index,
            Arc::new(StubEmbedder),
            &ChunkingConfig {
                chunk_size: 100,
                chunk_overlap: 100,
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let dir = tempdir().unwrap();
        let kb = kb_with(100, 10, dir.path());
        assert_eq!(kb.chunk_text("short text"), vec!["short text"]);
        assert!(kb.chunk_text("   ").is_empty());
    }

    #[test]
    fn chunks_never_exceed_chunk_size() {
        let dir = tempdir().unwrap();
        let kb = kb_with(50, 10, dir.path());
        let text = "这是第一句话。这是第二句话！第三句话呢？然后还有更多内容，继续写下去；直到超过限制为止。最后一句。".repeat(5);
        let chunks = kb.chunk_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 50, "oversized chunk: {chunk}");
        }
    }

    #[test]
    fn boundary_prefers_sentence_enders() {
        let chars: Vec<char> = "aaaa. bbbb, cccc".chars().collect();
        // Window covers the whole string; the period wins over the comma.
        let b = find_boundary(&chars, 0, chars.len());
        assert_eq!(chars[b - 1], ',');
        // Restrict the window so only the first half's period is visible.
        let b = find_boundary(&chars, 0, 8);
        assert_eq!(chars[b - 1], '.');
    }

    #[test]
    fn boundary_falls_back_to_hard_cut() {
        let chars: Vec<char> = "abcdefghij".chars().collect();
        assert_eq!(find_boundary(&chars, 0, 10), 10);
    }

    #[tokio::test]
    async fn add_articles_skips_incomplete_records() {
        let dir = tempdir().unwrap();
        let kb = kb_with(500, 50, dir.path());

        let mut with_id = Article::new("Title", "https://a/1", "S", SourceType::Arxiv)
            .with_content("Some body content.");
        with_id.id = Some(1);

        let no_id = Article::new("Title", "https://a/2", "S", SourceType::Arxiv)
            .with_content("Body.");

        let mut no_content = Article::new("Title", "https://a/3", "S", SourceType::Arxiv);
        no_content.id = Some(3);

        let added = kb
            .add_articles(&[with_id, no_id, no_content])
            .await
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(kb.len().await, 1);
    }

    #[tokio::test]
    async fn doc_ids_combine_article_and_chunk_index() {
        let dir = tempdir().unwrap();
        let kb = kb_with(30, 5, dir.path());
        let mut article = Article::new("T", "https://a/1", "S", SourceType::Arxiv)
            .with_content("First sentence here. Second sentence follows. Third one too.");
        article.id = Some(7);

        kb.add_articles(std::slice::from_ref(&article)).await.unwrap();
        let hits = kb.search("sentence", 10, None).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.doc_id.starts_with("7_")));
        assert!(hits.iter().all(|h| h.metadata.article_id == 7));
    }

    #[tokio::test]
    async fn rebuild_empties_the_collection() {
        let dir = tempdir().unwrap();
        let kb = kb_with(500, 50, dir.path());
        let mut article =
            Article::new("T", "https://a/1", "S", SourceType::Arxiv).with_content("Body.");
        article.id = Some(1);
        kb.add_articles(&[article]).await.unwrap();
        assert_eq!(kb.len().await, 1);

        kb.rebuild().await.unwrap();
        assert_eq!(kb.len().await, 0);
    }

    #[tokio::test]
    async fn empty_query_returns_nothing() {
        let dir = tempdir().unwrap();
        let kb = kb_with(500, 50, dir.path());
        assert!(kb.search("  ", 5, None).await.unwrap().is_empty());
    }
}
