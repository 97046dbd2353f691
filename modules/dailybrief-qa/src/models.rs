use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canned user-visible replies for the QA failure paths.
pub mod canned {
    pub const INVALID_QUERY: &str = "请输入有效的问题。 / Please enter a valid question.";
    pub const NO_RESULTS: &str =
        "知识库中暂无相关内容。 / No relevant content found in the knowledge base.";
    pub const SERVICE_ERROR: &str =
        "服务暂时不可用，请稍后再试。 / Service temporarily unavailable, please try again later.";
    pub const RATE_LIMITED_USER: &str = "请求过于频繁，请稍后再试。 / Too many requests, please retry later.";
    pub const RATE_LIMITED_GLOBAL: &str =
        "系统请求过于频繁，请稍后再试。 / System is busy, please retry later.";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    General,
    Vulnerability,
    Topic,
    Source,
    TimeRange,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Vulnerability => "vulnerability",
            Self::Topic => "topic",
            Self::Source => "source",
            Self::TimeRange => "time_range",
        }
    }
}

/// One source citation attached to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
    pub source_type: String,
    pub score: f32,
}

/// The QA engine's reply envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    pub query_type: QueryType,
}

impl QaResponse {
    pub fn canned(answer: &str, query_type: QueryType) -> Self {
        Self {
            answer: answer.to_string(),
            sources: Vec::new(),
            confidence: 0.0,
            query_type,
        }
    }
}

/// One (question, answer) pair in a user's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    pub sources: Vec<String>,
}
