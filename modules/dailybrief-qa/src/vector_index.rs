// Embedded vector store: in-memory records behind a pluggable trait, exact
// cosine scan, JSON snapshot persistence. Collection sizes here stay in the
// tens of thousands of chunks, where a scan beats maintaining an ANN graph.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// Metadata carried with every chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocMetadata {
    pub article_id: i64,
    pub chunk_index: usize,
    pub title: String,
    pub url: String,
    pub source_type: String,
    pub published_date: String,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocRecord {
    pub doc_id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: DocMetadata,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc_id: String,
    pub content: String,
    pub score: f32,
    pub metadata: DocMetadata,
}

/// Conjunctive metadata filter: every present condition must hold.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    /// Scalar or set membership on source_type.
    pub source_types: Option<Vec<String>>,
    pub category: Option<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.source_types.is_none() && self.category.is_none()
    }

    pub fn matches(&self, metadata: &DocMetadata) -> bool {
        if let Some(types) = &self.source_types {
            if !types.iter().any(|t| t == &metadata.source_type) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if category != &metadata.category {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, docs: Vec<DocRecord>) -> Result<()>;
    async fn search(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>>;
    async fn len(&self) -> usize;
    async fn clear(&self) -> Result<()>;
}

/// Index-parameter block persisted with the collection. Kept for
/// compatibility with ANN-backed implementations of [`VectorIndex`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionMeta {
    space: String,
    m: u32,
    construction_ef: u32,
}

impl Default for CollectionMeta {
    fn default() -> Self {
        Self {
            space: "cosine".to_string(),
            m: 16,
            construction_ef: 100,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    metadata: Option<CollectionMeta>,
    documents: Vec<DocRecord>,
}

/// The concrete embedded implementation.
pub struct SnapshotIndex {
    path: PathBuf,
    docs: RwLock<Vec<DocRecord>>,
}

impl SnapshotIndex {
    /// Open (or create) the collection file `dir/{collection}.json`.
    pub fn open(dir: impl AsRef<Path>, collection: &str) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create vector dir {}", dir.display()))?;
        let path = dir.join(format!("{collection}.json"));

        let docs = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read collection {}", path.display()))?;
            let snapshot: Snapshot = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse collection {}", path.display()))?;
            snapshot.documents
        } else {
            Vec::new()
        };

        info!(collection = %path.display(), documents = docs.len(), "Vector collection ready");
        Ok(Self {
            path,
            docs: RwLock::new(docs),
        })
    }

    fn persist(&self, docs: &[DocRecord]) -> Result<()> {
        let snapshot = Snapshot {
            metadata: Some(CollectionMeta::default()),
            documents: docs.to_vec(),
        };
        let raw = serde_json::to_string(&snapshot)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write collection {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for SnapshotIndex {
    async fn add(&self, new_docs: Vec<DocRecord>) -> Result<()> {
        if new_docs.is_empty() {
            return Ok(());
        }
        let mut docs = self.docs.write().await;
        docs.extend(new_docs);
        self.persist(&docs)
    }

    async fn search(
        &self,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let docs = self.docs.read().await;

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .filter(|doc| filter.map_or(true, |f| f.matches(&doc.metadata)))
            .filter(|doc| !doc.embedding.is_empty())
            .map(|doc| SearchHit {
                doc_id: doc.doc_id.clone(),
                content: doc.content.clone(),
                score: cosine_similarity(embedding, &doc.embedding).clamp(0.0, 1.0),
                metadata: doc.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(n_results);
        Ok(hits)
    }

    async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    async fn clear(&self) -> Result<()> {
        let mut docs = self.docs.write().await;
        docs.clear();
        self.persist(&docs)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn doc(doc_id: &str, embedding: Vec<f32>, source_type: &str, category: &str) -> DocRecord {
        DocRecord {
            doc_id: doc_id.to_string(),
            content: format!("content of {doc_id}"),
            embedding,
            metadata: DocMetadata {
                article_id: 1,
                chunk_index: 0,
                title: "t".into(),
                url: format!("https://a/{doc_id}"),
                source_type: source_type.to_string(),
                published_date: String::new(),
                category: category.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let dir = tempdir().unwrap();
        let index = SnapshotIndex::open(dir.path(), "test").unwrap();
        index
            .add(vec![
                doc("far", vec![0.0, 1.0], "arxiv", ""),
                doc("near", vec![1.0, 0.05], "arxiv", ""),
                doc("mid", vec![0.7, 0.7], "arxiv", ""),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits[0].doc_id, "near");
        assert_eq!(hits[1].doc_id, "mid");
        assert_eq!(hits[2].doc_id, "far");
        // Scores non-increasing and clamped.
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn filters_conjoin() {
        let dir = tempdir().unwrap();
        let index = SnapshotIndex::open(dir.path(), "test").unwrap();
        index
            .add(vec![
                doc("a", vec![1.0, 0.0], "arxiv", "AI安全"),
                doc("b", vec![1.0, 0.0], "nvd", "AI安全"),
                doc("c", vec![1.0, 0.0], "arxiv", "其他"),
            ])
            .await
            .unwrap();

        let filter = MetadataFilter {
            source_types: Some(vec!["arxiv".into()]),
            category: Some("AI安全".into()),
        };
        let hits = index.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "a");

        let set_filter = MetadataFilter {
            source_types: Some(vec!["arxiv".into(), "nvd".into()]),
            category: None,
        };
        let hits = index.search(&[1.0, 0.0], 10, Some(&set_filter)).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn snapshot_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let index = SnapshotIndex::open(dir.path(), "test").unwrap();
            index
                .add(vec![doc("a", vec![1.0, 0.0], "arxiv", "")])
                .await
                .unwrap();
        }
        let index = SnapshotIndex::open(dir.path(), "test").unwrap();
        assert_eq!(index.len().await, 1);

        index.clear().await.unwrap();
        assert_eq!(index.len().await, 0);
        let index = SnapshotIndex::open(dir.path(), "test").unwrap();
        assert_eq!(index.len().await, 0);
    }

    #[test]
    fn cosine_similarity_edge_cases() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0], &[0.0]), 0.0);
    }
}
