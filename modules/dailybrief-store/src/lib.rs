pub mod articles;
pub mod checkpoint;

pub use articles::{ArticleStore, SourceStat, StoreError};
pub use checkpoint::{CheckpointManager, CheckpointStatus, FetchCheckpoint, ProcessCheckpoint};
