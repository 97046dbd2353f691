use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed category set assigned by the enricher. Anything the model returns
/// outside this list collapses to [`FALLBACK_CATEGORY`].
pub const CATEGORIES: &[&str] = &[
    "AI安全",
    "系统安全",
    "网络安全",
    "密码学",
    "软件安全",
    "AI技术",
    "其他",
];

/// Category used when the model's answer is not in [`CATEGORIES`].
pub const FALLBACK_CATEGORY: &str = "其他";

/// Origin class of an article. Serialized snake_case everywhere (store,
/// checkpoints, vector metadata, query filters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Arxiv,
    Rss,
    Dblp,
    Nvd,
    Kev,
    Huggingface,
    Pwc,
    Blog,
    Github,
    Hunyuan,
    AnthropicRed,
    AtumBlog,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Rss => "rss",
            Self::Dblp => "dblp",
            Self::Nvd => "nvd",
            Self::Kev => "kev",
            Self::Huggingface => "huggingface",
            Self::Pwc => "pwc",
            Self::Blog => "blog",
            Self::Github => "github",
            Self::Hunyuan => "hunyuan",
            Self::AnthropicRed => "anthropic_red",
            Self::AtumBlog => "atum_blog",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "arxiv" => Some(Self::Arxiv),
            "rss" => Some(Self::Rss),
            "dblp" => Some(Self::Dblp),
            "nvd" => Some(Self::Nvd),
            "kev" => Some(Self::Kev),
            "huggingface" => Some(Self::Huggingface),
            "pwc" => Some(Self::Pwc),
            "blog" => Some(Self::Blog),
            "github" => Some(Self::Github),
            "hunyuan" => Some(Self::Hunyuan),
            "anthropic_red" => Some(Self::AnthropicRed),
            "atum_blog" => Some(Self::AtumBlog),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The universal record every fetcher emits and everything downstream consumes.
///
/// `id` is absent until the store assigns one. Only the enricher mutates
/// `content`/`summary`/`zh_summary`/`category`; only the store sets `id` and
/// flips `is_pushed` (false -> true, never back).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    pub url: String,
    pub source: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub published_date: String,
    #[serde(default)]
    pub fetched_at: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub zh_summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub is_pushed: bool,
    /// Source-specific fields: cve_id, cvss_score, authors, github_stars, ...
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

impl Article {
    /// Minimal constructor used by fetchers; everything else defaults.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            id: None,
            title: title.into(),
            url: url.into(),
            source: source.into(),
            source_type,
            published_date: String::new(),
            fetched_at: String::new(),
            content: String::new(),
            summary: String::new(),
            zh_summary: String::new(),
            category: String::new(),
            is_pushed: false,
            extras: Map::new(),
        }
    }

    pub fn with_published_date(mut self, date: impl Into<String>) -> Self {
        self.published_date = date.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extras.insert(key.to_string(), value);
        self
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras.get(key).and_then(Value::as_str)
    }

    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        self.extras.get(key).and_then(Value::as_f64)
    }
}

/// A fetcher's return envelope. A failed fetcher returns empty `items` plus a
/// non-empty `error` instead of propagating an Err out of `fetch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub items: Vec<Article>,
    pub source_name: String,
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchResult {
    pub fn ok(source_name: impl Into<String>, source_type: SourceType, items: Vec<Article>) -> Self {
        Self {
            items,
            source_name: source_name.into(),
            source_type,
            error: None,
        }
    }

    pub fn failed(
        source_name: impl Into<String>,
        source_type: SourceType,
        error: impl Into<String>,
    ) -> Self {
        Self {
            items: Vec::new(),
            source_name: source_name.into(),
            source_type,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trips_through_str() {
        for st in [
            SourceType::Arxiv,
            SourceType::Rss,
            SourceType::Kev,
            SourceType::AnthropicRed,
            SourceType::AtumBlog,
        ] {
            assert_eq!(SourceType::parse(st.as_str()), Some(st));
        }
        assert_eq!(SourceType::parse("bogus"), None);
    }

    #[test]
    fn source_type_serde_uses_snake_case() {
        let json = serde_json::to_string(&SourceType::AnthropicRed).unwrap();
        assert_eq!(json, "\"anthropic_red\"");
    }

    #[test]
    fn fetch_result_error_envelope() {
        let ok = FetchResult::ok("NVD", SourceType::Nvd, vec![]);
        assert!(ok.is_success());
        let failed = FetchResult::failed("NVD", SourceType::Nvd, "timeout");
        assert!(!failed.is_success());
        assert!(failed.items.is_empty());
    }

    #[test]
    fn article_extras_accessors() {
        let a = Article::new("t", "https://a/1", "NVD", SourceType::Nvd)
            .with_extra("cve_id", Value::String("CVE-2024-1234".into()))
            .with_extra("cvss_score", serde_json::json!(9.8));
        assert_eq!(a.extra_str("cve_id"), Some("CVE-2024-1234"));
        assert_eq!(a.extra_f64("cvss_score"), Some(9.8));
        assert_eq!(a.extra_str("missing"), None);
    }
}
