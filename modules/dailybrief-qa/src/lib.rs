pub mod context;
pub mod embedder;
pub mod engine;
pub mod history;
pub mod knowledge_base;
pub mod models;
pub mod query_processor;
pub mod rate_limiter;
pub mod retriever;
pub mod vector_index;

pub use context::ContextManager;
pub use embedder::{EmbeddingClient, TextEmbedder};
pub use engine::QaEngine;
pub use history::HistoryAwareQueryBuilder;
pub use knowledge_base::KnowledgeBase;
pub use models::{ConversationTurn, QaResponse, QueryType, SourceRef};
pub use query_processor::{ParsedQuery, QueryProcessor};
pub use rate_limiter::{RateLimitResult, RateLimiter};
pub use retriever::{ChunkResult, EnhancedRetriever};
pub use vector_index::{MetadataFilter, SearchHit, SnapshotIndex, VectorIndex};
