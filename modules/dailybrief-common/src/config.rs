use std::collections::HashMap;
use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application configuration: a JSON file for tunables plus environment
/// variables for credentials. Every section has workable defaults so a bare
/// `Config::default()` is enough for tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schedule: ScheduleConfig,
    pub checkpoint: CheckpointConfig,
    pub store: StoreConfig,
    pub ai: AiConfig,
    pub fetchers: FetchersConfig,
    pub push: PushConfig,
    pub lark: LarkConfig,
    pub knowledge_qa: KnowledgeQaConfig,
}

impl Config {
    /// Load the JSON config file (if present), then overlay credentials from
    /// the environment. A missing file yields pure defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", p.display()))?
            }
            _ => Self::default(),
        };
        config.overlay_env();
        Ok(config)
    }

    fn overlay_env(&mut self) {
        if let Ok(v) = env::var("DAILYBRIEF_AI_API_KEY") {
            self.ai.api_key = v;
        }
        if let Ok(v) = env::var("DAILYBRIEF_EMBEDDING_API_KEY") {
            self.knowledge_qa.embedding.api_key = v;
        }
        if let Ok(v) = env::var("LARK_APP_ID") {
            self.lark.app_id = v;
        }
        if let Ok(v) = env::var("LARK_APP_SECRET") {
            self.lark.app_secret = v;
        }
        if let Ok(v) = env::var("GITHUB_TOKEN") {
            self.fetchers.github.token = v;
        }
        if let Ok(v) = env::var("NVD_API_KEY") {
            self.fetchers.nvd.api_key = v;
        }
        // The embedding endpoint defaults to the chat endpoint's credentials.
        if self.knowledge_qa.embedding.api_key.is_empty() {
            self.knowledge_qa.embedding.api_key = self.ai.api_key.clone();
        }
        if self.knowledge_qa.embedding.api_base.is_empty() {
            self.knowledge_qa.embedding.api_base = self.ai.api_base.clone();
        }
    }

    /// Log which credentials are present without exposing their values.
    pub fn log_redacted(&self) {
        let vars = [
            ("ai.api_key", &self.ai.api_key),
            ("embedding.api_key", &self.knowledge_qa.embedding.api_key),
            ("lark.app_id", &self.lark.app_id),
            ("lark.app_secret", &self.lark.app_secret),
            ("github.token", &self.fetchers.github.token),
            ("nvd.api_key", &self.fetchers.nvd.api_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local wall-clock time "HH:MM" of the daily run.
    pub time: String,
    /// IANA timezone the schedule time is interpreted in.
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: "08:00".to_string(),
            timezone: "Asia/Shanghai".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub enabled: bool,
    pub dir: String,
    pub max_age_hours: i64,
    /// Persist the in-memory checkpoint every N completions.
    pub save_interval: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "data/checkpoints".to_string(),
            max_age_hours: 24,
            save_interval: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. `:memory:` is accepted for tests.
    pub path: String,
    /// GitHub fetcher repo-state snapshot path.
    pub github_state_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/articles.db".to_string(),
            github_state_path: "data/github_state.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchersConfig {
    pub max_workers: Option<usize>,
    pub arxiv: ArxivConfig,
    pub rss: RssConfig,
    pub dblp: DblpConfig,
    pub nvd: NvdConfig,
    pub kev: KevConfig,
    pub huggingface: SimpleFetcherConfig,
    pub pwc: PwcConfig,
    pub blogs: BlogsConfig,
    pub github: GithubConfig,
    pub hunyuan: SimpleFetcherConfig,
    pub anthropic_red: SimpleFetcherConfig,
    pub atum_blog: SimpleFetcherConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleFetcherConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_results: usize,
}

impl Default for SimpleFetcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 30,
            max_results: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArxivConfig {
    pub enabled: bool,
    pub categories: Vec<String>,
    pub keywords: Vec<String>,
    pub max_results: usize,
    pub days_back: i64,
    pub timeout_secs: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            categories: vec!["cs.CR".to_string(), "cs.AI".to_string()],
            keywords: Vec::new(),
            max_results: 50,
            days_back: 2,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSpec {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RssConfig {
    pub enabled: bool,
    pub feeds: Vec<FeedSpec>,
    pub days_back: i64,
    pub timeout_secs: u64,
    pub max_items_per_feed: usize,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            feeds: Vec::new(),
            days_back: 3,
            timeout_secs: 30,
            max_items_per_feed: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DblpConfig {
    pub enabled: bool,
    /// Conference streams, e.g. ("IEEE S&P", "conf/sp").
    pub streams: Vec<FeedSpec>,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for DblpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            streams: vec![
                FeedSpec {
                    name: "IEEE S&P".to_string(),
                    url: "conf/sp".to_string(),
                },
                FeedSpec {
                    name: "ACM CCS".to_string(),
                    url: "conf/ccs".to_string(),
                },
                FeedSpec {
                    name: "USENIX Security".to_string(),
                    url: "conf/uss".to_string(),
                },
                FeedSpec {
                    name: "NDSS".to_string(),
                    url: "conf/ndss".to_string(),
                },
            ],
            max_results: 100,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NvdConfig {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub days_back: i64,
    pub min_cvss_score: f64,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for NvdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            days_back: 2,
            min_cvss_score: 7.0,
            max_results: 100,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KevConfig {
    pub enabled: bool,
    pub days_back: i64,
    pub min_cvss_score: f64,
    pub timeout_secs: u64,
}

impl Default for KevConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days_back: 7,
            min_cvss_score: 0.0,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PwcConfig {
    pub enabled: bool,
    pub max_results: usize,
    pub days_back: i64,
    pub timeout_secs: u64,
}

impl Default for PwcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_results: 50,
            days_back: 3,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlogsConfig {
    pub enabled: bool,
    pub feeds: Vec<FeedSpec>,
    pub days_back: i64,
    pub timeout_secs: u64,
}

impl Default for BlogsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            feeds: vec![
                FeedSpec {
                    name: "Google Online Security".to_string(),
                    url: "https://security.googleblog.com/feeds/posts/default".to_string(),
                },
                FeedSpec {
                    name: "Microsoft MSRC".to_string(),
                    url: "https://msrc.microsoft.com/blog/feed".to_string(),
                },
                FeedSpec {
                    name: "Cloudflare".to_string(),
                    url: "https://blog.cloudflare.com/rss/".to_string(),
                },
            ],
            days_back: 7,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub token: String,
    pub topics: Vec<String>,
    pub min_stars: u64,
    pub days_back: i64,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            topics: vec![
                "security".to_string(),
                "llm".to_string(),
                "ai".to_string(),
                "machine-learning".to_string(),
            ],
            min_stars: 100,
            days_back: 7,
            max_results: 50,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub high_threshold: u8,
    pub mid_threshold: u8,
    pub enable_ai_scoring: bool,
    pub source_weights: HashMap<String, f64>,
    /// Proxy honored by the content processor's outbound requests.
    pub http_proxy: String,
    pub max_content_length: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            high_threshold: 80,
            mid_threshold: 50,
            enable_ai_scoring: false,
            source_weights: HashMap::new(),
            http_proxy: String::new(),
            max_content_length: 8000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LarkConfig {
    #[serde(skip_serializing)]
    pub app_id: String,
    #[serde(skip_serializing)]
    pub app_secret: String,
    /// Destination group chat for the daily push.
    pub chat_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeQaConfig {
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub qa_engine: QaEngineConfig,
    pub rate_limit: RateLimitConfig,
    pub event_server: EventServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub path: String,
    pub collection_name: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            path: "data/vector_index".to_string(),
            collection_name: "knowledge_articles".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub dimension: usize,
    pub rate_limit_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            rate_limit_delay_ms: 200,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub similarity_threshold: f32,
    pub max_chunks_per_doc: usize,
    pub max_history_turns: usize,
    pub dedup_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.0,
            max_chunks_per_doc: 2,
            max_history_turns: 5,
            dedup_threshold: 0.95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaEngineConfig {
    pub max_retrieved_docs: usize,
    pub min_relevance_score: f32,
    pub answer_max_length: usize,
}

impl Default for QaEngineConfig {
    fn default() -> Self {
        Self {
            max_retrieved_docs: 10,
            min_relevance_score: 0.5,
            answer_max_length: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: usize,
    pub requests_per_user_minute: usize,
    pub window_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            requests_per_user_minute: 10,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventServerConfig {
    pub host: String,
    pub port: u16,
    pub verification_token: String,
    #[serde(skip_serializing)]
    pub encrypt_key: String,
    /// Reject (401) on signature mismatch instead of logging and continuing.
    pub strict_signature: bool,
}

impl Default for EventServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            verification_token: String::new(),
            encrypt_key: String::new(),
            strict_signature: false,
        }
    }
}
