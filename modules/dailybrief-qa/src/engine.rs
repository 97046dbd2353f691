use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use ai_client::ChatAgent;
use dailybrief_common::config::QaEngineConfig;
use dailybrief_common::text::ellipsize;

use crate::context::ContextManager;
use crate::models::{canned, ConversationTurn, QaResponse, QueryType, SourceRef};
use crate::query_processor::QueryProcessor;
use crate::retriever::{ChunkResult, EnhancedRetriever};

/// Sentence enders considered when truncating an answer.
const ANSWER_ENDINGS: &[char] = &['。', '！', '？', '.', '!', '?', '\n'];
/// Appended when an answer is cut at the length ceiling.
const TRUNCATION_NOTICE: &str = "\n\n[回答已截断，如需更多信息请继续提问]";
/// History turns shown to the synthesis prompt.
const SYNTHESIS_HISTORY_TURNS: usize = 3;

const RAG_SYSTEM_PROMPT: &str = "你是一个专业的技术问答助手，拥有丰富的知识。你可以访问一个知识库作为额外的参考资料。

回答要求：
1. 综合使用你自己的知识和提供的参考资料来回答问题
2. 如果参考资料中有相关内容，优先引用并在末尾列出来源
3. 如果参考资料不够或不相关，直接用你自己的知识回答即可
4. 回答要简洁、准确、有条理
5. 使用中文回答";

const NO_CONTEXT_SYSTEM_PROMPT: &str = "你是一个专业的技术问答助手，拥有丰富的知识。

回答要求：
1. 使用你的知识回答用户问题
2. 回答要简洁、准确、有条理
3. 如果问题超出你的能力范围，请诚实告知
4. 使用中文回答";

const UNAVAILABLE_ANSWER: &str = "抱歉，我暂时无法回答这个问题。请稍后再试。";

/// The RAG orchestrator: parse -> retrieve -> synthesize -> record.
pub struct QaEngine {
    retriever: Arc<EnhancedRetriever>,
    context: Arc<ContextManager>,
    query_processor: QueryProcessor,
    agent: Arc<dyn ChatAgent>,
    config: QaEngineConfig,
}

impl QaEngine {
    pub fn new(
        retriever: Arc<EnhancedRetriever>,
        context: Arc<ContextManager>,
        agent: Arc<dyn ChatAgent>,
        config: QaEngineConfig,
    ) -> Self {
        Self {
            retriever,
            context,
            query_processor: QueryProcessor::new(),
            agent,
            config,
        }
    }

    pub async fn process_query(
        &self,
        query: &str,
        user_id: &str,
        chat_id: Option<&str>,
    ) -> QaResponse {
        let query = query.trim();
        if query.is_empty() {
            return QaResponse::canned(canned::INVALID_QUERY, QueryType::General);
        }

        info!(user_id, chat_id = chat_id.unwrap_or(""), query = %ellipsize(query, 50), "Processing query");

        match self.answer(query, user_id).await {
            Ok(response) => {
                info!(
                    user_id,
                    confidence = response.confidence,
                    sources = response.sources.len(),
                    "Generated response"
                );
                response
            }
            Err(e) => {
                error!(user_id, error = ?e, "Query processing failed");
                QaResponse::canned(canned::SERVICE_ERROR, QueryType::General)
            }
        }
    }

    async fn answer(&self, query: &str, user_id: &str) -> anyhow::Result<QaResponse> {
        let parsed = self.query_processor.parse(query);
        let filter = parsed.search_filter();
        debug!(query_type = parsed.query_type.as_str(), "Parsed query");

        let history = self.context.get_context(user_id);

        let docs = match self
            .retriever
            .retrieve(query, &history, self.config.max_retrieved_docs, filter.as_ref())
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "Retrieval failed, continuing without documents");
                Vec::new()
            }
        };

        let relevant: Vec<ChunkResult> = docs
            .into_iter()
            .filter(|d| d.score >= self.config.min_relevance_score)
            .collect();

        let response = if relevant.is_empty() {
            self.answer_without_context(query, parsed.query_type).await
        } else {
            self.answer_with_context(query, &relevant, &history, parsed.query_type)
                .await
        };

        // Record the turn for every path that produced a user-visible answer.
        let source_urls = response.sources.iter().map(|s| s.url.clone()).collect();
        self.context.add_turn(
            user_id,
            ConversationTurn {
                query: query.to_string(),
                answer: response.answer.clone(),
                timestamp: Utc::now(),
                sources: source_urls,
            },
        );

        Ok(response)
    }

    async fn answer_with_context(
        &self,
        query: &str,
        docs: &[ChunkResult],
        history: &[ConversationTurn],
        query_type: QueryType,
    ) -> QaResponse {
        let context_text = build_context_text(docs);
        let history_text = build_history_text(history);
        let user_prompt = format!(
            "请回答用户的问题。以下是从知识库检索到的可能相关的参考资料，你可以选择性地使用。\n\n\
             ## 知识库参考资料\n{context_text}\n\n\
             ## 对话历史\n{history_text}\n\n\
             ## 用户问题\n{query}\n\n\
             请综合你的知识和参考资料回答问题。如果引用了参考资料，请在末尾列出来源链接。"
        );

        let answer = match self.agent.chat(RAG_SYSTEM_PROMPT, &user_prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                warn!("Model returned empty answer, using extractive fallback");
                extractive_fallback(docs)
            }
            Err(e) => {
                warn!(error = %e, "Synthesis call failed, using extractive fallback");
                extractive_fallback(docs)
            }
        };

        QaResponse {
            answer: self.truncate_answer(&answer),
            sources: extract_sources(docs),
            confidence: self.confidence(docs),
            query_type,
        }
    }

    async fn answer_without_context(&self, query: &str, query_type: QueryType) -> QaResponse {
        let user_prompt = format!("用户问题：{query}\n\n请回答这个问题。");
        match self.agent.chat(NO_CONTEXT_SYSTEM_PROMPT, &user_prompt).await {
            Ok(answer) if !answer.trim().is_empty() => QaResponse {
                answer: self.truncate_answer(&answer),
                sources: Vec::new(),
                // No knowledge-base support behind this answer.
                confidence: 0.3,
                query_type,
            },
            _ => QaResponse {
                answer: UNAVAILABLE_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                query_type,
            },
        }
    }

    /// Cut at the last sentence ender inside the ceiling, provided at least
    /// 70% of the window survives; otherwise hard-cut.
    fn truncate_answer(&self, answer: &str) -> String {
        let max = self.config.answer_max_length;
        let chars: Vec<char> = answer.chars().collect();
        if max == 0 || chars.len() <= max {
            return answer.to_string();
        }

        let floor = (max as f64 * 0.7) as usize;
        let mut cut = max;
        for i in (floor..max).rev() {
            if ANSWER_ENDINGS.contains(&chars[i]) {
                cut = i + 1;
                break;
            }
        }

        let mut out: String = chars[..cut].iter().collect();
        out.push_str(TRUNCATION_NOTICE);
        out
    }

    /// `0.7 * mean(scores) + 0.3 * min(docs / max_retrieved, 1)`, clamped.
    fn confidence(&self, docs: &[ChunkResult]) -> f32 {
        if docs.is_empty() {
            return 0.0;
        }
        let mean: f32 = docs.iter().map(|d| d.score).sum::<f32>() / docs.len() as f32;
        let doc_factor = (docs.len() as f32 / self.config.max_retrieved_docs.max(1) as f32).min(1.0);
        (mean * 0.7 + doc_factor * 0.3).clamp(0.0, 1.0)
    }
}

fn build_context_text(docs: &[ChunkResult]) -> String {
    if docs.is_empty() {
        return "（无相关参考资料）".to_string();
    }
    docs.iter()
        .enumerate()
        .map(|(i, doc)| {
            let title = if doc.metadata.title.is_empty() {
                "未知标题"
            } else {
                doc.metadata.title.as_str()
            };
            let mut part = format!("### 参考资料 {}\n**标题**: {title}\n", i + 1);
            if !doc.metadata.url.is_empty() {
                part.push_str(&format!("**来源**: {}\n", doc.metadata.url));
            }
            part.push_str(&format!("**相关度**: {:.2}\n**内容**:\n{}\n", doc.score, doc.content));
            part
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn build_history_text(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return "（无历史对话）".to_string();
    }
    let start = history.len().saturating_sub(SYNTHESIS_HISTORY_TURNS);
    history[start..]
        .iter()
        .map(|turn| {
            format!(
                "用户: {}\n助手: {}",
                turn.query,
                ellipsize(&turn.answer, 200)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Used when the model call fails but retrieval produced documents.
fn extractive_fallback(docs: &[ChunkResult]) -> String {
    let mut parts = vec!["根据知识库检索，找到以下相关内容：\n".to_string()];
    for (i, doc) in docs.iter().take(3).enumerate() {
        let title = if doc.metadata.title.is_empty() {
            "未知标题"
        } else {
            doc.metadata.title.as_str()
        };
        let mut part = format!("{}. **{title}**\n   {}...\n", i + 1, ellipsize(&doc.content, 200));
        if !doc.metadata.url.is_empty() {
            part.push_str(&format!("   来源: {}\n", doc.metadata.url));
        }
        parts.push(part);
    }
    parts.join("\n")
}

/// Sources deduped by url, first-seen order preserved.
fn extract_sources(docs: &[ChunkResult]) -> Vec<SourceRef> {
    let mut seen = std::collections::HashSet::new();
    docs.iter()
        .filter(|d| !d.metadata.url.is_empty())
        .filter(|d| seen.insert(d.metadata.url.clone()))
        .map(|d| SourceRef {
            title: d.metadata.title.clone(),
            url: d.metadata.url.clone(),
            source_type: d.metadata.source_type.clone(),
            score: d.score,
        })
        .collect()
}
