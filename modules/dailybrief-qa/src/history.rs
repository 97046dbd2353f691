use dailybrief_common::text::ellipsize;

use crate::models::ConversationTurn;

/// Caps applied to each turn's contribution to the retrieval string.
const QUERY_SNIPPET_CHARS: usize = 100;
const ANSWER_SNIPPET_CHARS: usize = 150;

/// Folds recent conversation turns into the retrieval query so follow-up
/// questions ("它有什么优点?") still retrieve against the right subject.
pub struct HistoryAwareQueryBuilder {
    default_max_turns: usize,
}

impl HistoryAwareQueryBuilder {
    pub fn new(default_max_turns: usize) -> Self {
        Self { default_max_turns }
    }

    /// Compose the retrieval string. With no history the query passes through
    /// verbatim; otherwise the last `max_turns` turns are summarized in
    /// chronological order and prefixed to the query.
    pub fn build(
        &self,
        current_query: &str,
        history: &[ConversationTurn],
        max_turns: Option<usize>,
    ) -> String {
        let current_query = current_query.trim();
        if current_query.is_empty() {
            return String::new();
        }
        if history.is_empty() {
            return current_query.to_string();
        }

        let max_turns = max_turns.unwrap_or(self.default_max_turns);
        let truncated = Self::truncate(history, max_turns);
        if truncated.is_empty() {
            return current_query.to_string();
        }

        let mut parts = Vec::new();
        for turn in truncated {
            if !turn.query.is_empty() {
                parts.push(format!("Q: {}", ellipsize(&turn.query, QUERY_SNIPPET_CHARS)));
            }
            if !turn.answer.is_empty() {
                parts.push(format!("A: {}", ellipsize(&turn.answer, ANSWER_SNIPPET_CHARS)));
            }
        }
        if parts.is_empty() {
            return current_query.to_string();
        }

        format!("[对话上下文: {}] {current_query}", parts.join(" | "))
    }

    /// Last `max_turns` entries, chronological order preserved.
    pub fn truncate(history: &[ConversationTurn], max_turns: usize) -> &[ConversationTurn] {
        if max_turns == 0 {
            return &[];
        }
        if history.len() <= max_turns {
            return history;
        }
        &history[history.len() - max_turns..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(query: &str, answer: &str) -> ConversationTurn {
        ConversationTurn {
            query: query.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
            sources: Vec::new(),
        }
    }

    #[test]
    fn no_history_returns_query_verbatim() {
        let builder = HistoryAwareQueryBuilder::new(5);
        assert_eq!(builder.build("什么是RAG?", &[], None), "什么是RAG?");
    }

    #[test]
    fn history_is_prefixed_in_order() {
        let builder = HistoryAwareQueryBuilder::new(5);
        let history = vec![turn("什么是向量数据库?", "向量数据库是存储嵌入的系统")];
        let enhanced = builder.build("它有什么优点?", &history, None);
        assert!(enhanced.starts_with("[对话上下文: "));
        assert!(enhanced.contains("向量数据库"));
        assert!(enhanced.ends_with("它有什么优点?"));
    }

    #[test]
    fn only_the_most_recent_turns_survive_truncation() {
        let builder = HistoryAwareQueryBuilder::new(2);
        let history: Vec<ConversationTurn> =
            (0..6).map(|i| turn(&format!("q{i}"), &format!("a{i}"))).collect();
        let enhanced = builder.build("next", &history, None);
        assert!(!enhanced.contains("q3"));
        assert!(enhanced.contains("q4"));
        assert!(enhanced.contains("q5"));
        // Chronological: q4 before q5.
        assert!(enhanced.find("q4").unwrap() < enhanced.find("q5").unwrap());
    }

    #[test]
    fn explicit_max_turns_overrides_default() {
        let builder = HistoryAwareQueryBuilder::new(5);
        let history: Vec<ConversationTurn> =
            (0..4).map(|i| turn(&format!("q{i}"), "")).collect();
        let enhanced = builder.build("next", &history, Some(1));
        assert!(!enhanced.contains("q2"));
        assert!(enhanced.contains("q3"));
    }

    #[test]
    fn long_turns_are_snipped() {
        let builder = HistoryAwareQueryBuilder::new(5);
        let history = vec![turn(&"问".repeat(300), &"答".repeat(500))];
        let enhanced = builder.build("next", &history, None);
        // Far smaller than the raw 800 chars.
        assert!(enhanced.chars().count() < 320);
        assert!(enhanced.contains("..."));
    }

    #[test]
    fn zero_max_turns_behaves_like_no_history() {
        let builder = HistoryAwareQueryBuilder::new(5);
        let history = vec![turn("q", "a")];
        assert_eq!(builder.build("next", &history, Some(0)), "next");
    }
}
