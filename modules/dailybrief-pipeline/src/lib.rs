pub mod enricher;
pub mod messenger;
pub mod pusher;
pub mod scheduler;
pub mod scorer;
pub mod selector;

pub use enricher::{Enricher, Enrichment};
pub use messenger::{LarkClient, Messenger};
pub use pusher::TieredPusher;
pub use scheduler::{PipelineDeps, RunStats, Scheduler};
pub use scorer::{PriorityScorer, ScoredArticle};
pub use selector::{IdentitySelector, SmartSelector};
