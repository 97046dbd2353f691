// Inbound message decoding: the platform delivers content as plain text, a
// JSON `{"text": ...}` string, or a rich post with tagged nodes. All three
// reduce to the user's actual question.

use serde_json::Value;

/// A decoded `im.message.receive_v1` event.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message_id: String,
    pub chat_id: String,
    pub chat_type: String,
    pub sender_id: String,
    pub text: String,
    pub mentioned_bot: bool,
}

impl IncomingMessage {
    /// The bot answers private chats and group messages that @-mention it.
    pub fn requires_response(&self) -> bool {
        self.chat_type == "p2p" || self.mentioned_bot
    }
}

/// Extract the event id used for webhook dedup: `header.event_id`, legacy
/// `uuid`, or a message-id derived fallback.
pub fn extract_event_id(data: &Value) -> String {
    if let Some(id) = data["header"]["event_id"].as_str() {
        return id.to_string();
    }
    if let Some(id) = data["uuid"].as_str() {
        return id.to_string();
    }
    if let Some(id) = data["event"]["message"]["message_id"].as_str() {
        return format!("msg_{id}");
    }
    String::new()
}

/// The event type, from the v2 header or the legacy event body.
pub fn event_type(data: &Value) -> &str {
    data["header"]["event_type"]
        .as_str()
        .or_else(|| data["event"]["type"].as_str())
        .or_else(|| data["type"].as_str())
        .unwrap_or("")
}

/// Decode a message event into an [`IncomingMessage`].
pub fn parse_message_event(data: &Value) -> Option<IncomingMessage> {
    let event = &data["event"];
    let message = &event["message"];

    let message_id = message["message_id"].as_str()?.to_string();
    let chat_id = message["chat_id"].as_str().unwrap_or_default().to_string();
    let chat_type = message["chat_type"].as_str().unwrap_or_default().to_string();
    let sender_id = event["sender"]["sender_id"]["open_id"]
        .as_str()
        .or_else(|| event["sender"]["sender_id"]["user_id"].as_str())
        .unwrap_or_default()
        .to_string();

    let message_type = message["message_type"].as_str().unwrap_or("text");
    let raw_content = message["content"].as_str().unwrap_or_default();
    let mentions = message["mentions"].as_array().cloned().unwrap_or_default();

    let text = extract_text(message_type, raw_content);
    let mentioned_bot = !mentions.is_empty();
    let mention_names: Vec<String> = mentions
        .iter()
        .filter_map(|m| m["name"].as_str().map(String::from))
        .collect();

    Some(IncomingMessage {
        message_id,
        chat_id,
        chat_type,
        sender_id,
        text: strip_mentions(&text, &mention_names),
        mentioned_bot,
    })
}

/// Reduce the content field to plain text for any of the three delivery forms.
fn extract_text(message_type: &str, raw_content: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(raw_content).ok();

    match (message_type, parsed) {
        ("text", Some(v)) => v["text"].as_str().unwrap_or(raw_content).to_string(),
        ("post", Some(v)) => {
            // Possibly wrapped in a locale key.
            let content = if v["content"].is_array() {
                v["content"].clone()
            } else {
                v["zh_cn"]["content"].clone()
            };
            extract_text_from_post(&content)
        }
        // Unparseable content: treat the raw field as the text itself.
        (_, None) => raw_content.to_string(),
        (_, Some(v)) => v["text"].as_str().unwrap_or(raw_content).to_string(),
    }
}

/// Flatten rich-post paragraphs into one line of text.
fn extract_text_from_post(content: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(paragraphs) = content.as_array() {
        for paragraph in paragraphs {
            if let Some(nodes) = paragraph.as_array() {
                for node in nodes {
                    match node["tag"].as_str() {
                        Some("text") | Some("a") => {
                            if let Some(text) = node["text"].as_str() {
                                parts.push(text.to_string());
                            }
                        }
                        // Mentions resolve to placeholders; dropped here.
                        _ => {}
                    }
                }
            }
        }
    }
    parts.join(" ")
}

/// Drop `@_user_N` placeholders and literal mention names, leaving the
/// question itself.
fn strip_mentions(text: &str, mention_names: &[String]) -> String {
    let mut out = text.to_string();
    for name in mention_names {
        if !name.is_empty() {
            out = out.replace(&format!("@{name}"), " ");
            out = out.replace(name.as_str(), " ");
        }
    }
    out.split_whitespace()
        .filter(|token| !token.starts_with("@_user_"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Feedback-card callbacks carry a rating and the rated article.
#[derive(Debug, Clone)]
pub struct CardFeedback {
    pub user_id: String,
    pub article_id: String,
    pub rating: String,
}

pub fn parse_card_action(data: &Value) -> Option<CardFeedback> {
    let event = &data["event"];
    let action_value = &event["action"]["value"];
    let rating = action_value["rating"]
        .as_str()
        .or_else(|| action_value["action"].as_str())?
        .to_string();
    Some(CardFeedback {
        user_id: event["operator"]["open_id"]
            .as_str()
            .or_else(|| data["open_id"].as_str())
            .unwrap_or_default()
            .to_string(),
        article_id: action_value["article_id"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        rating,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_event(message_type: &str, content: &str, chat_type: &str, mentions: Value) -> Value {
        json!({
            "header": {"event_id": "e-1", "event_type": "im.message.receive_v1"},
            "event": {
                "sender": {"sender_id": {"open_id": "ou_sender"}},
                "message": {
                    "message_id": "om_1",
                    "chat_id": "oc_1",
                    "chat_type": chat_type,
                    "message_type": message_type,
                    "content": content,
                    "mentions": mentions
                }
            }
        })
    }

    #[test]
    fn plain_text_content_parses() {
        let data = message_event("text", r#"{"text":"什么是RAG?"}"#, "p2p", json!([]));
        let msg = parse_message_event(&data).unwrap();
        assert_eq!(msg.text, "什么是RAG?");
        assert_eq!(msg.sender_id, "ou_sender");
        assert!(msg.requires_response(), "private chats always answered");
        assert!(!msg.mentioned_bot);
    }

    #[test]
    fn group_message_without_mention_is_ignored() {
        let data = message_event("text", r#"{"text":"hello"}"#, "group", json!([]));
        let msg = parse_message_event(&data).unwrap();
        assert!(!msg.requires_response());
    }

    #[test]
    fn mention_is_stripped_from_question() {
        let data = message_event(
            "text",
            r#"{"text":"@_user_1 最近的漏洞有哪些"}"#,
            "group",
            json!([{"key": "@_user_1", "name": "SecBot"}]),
        );
        let msg = parse_message_event(&data).unwrap();
        assert!(msg.requires_response());
        assert_eq!(msg.text, "最近的漏洞有哪些");
    }

    #[test]
    fn rich_post_flattens_to_text() {
        let content = json!({
            "title": "t",
            "content": [[
                {"tag": "text", "text": "question about"},
                {"tag": "a", "text": "this link", "href": "https://x"},
                {"tag": "at", "user_id": "u1"}
            ]]
        });
        let data = message_event("post", &content.to_string(), "p2p", json!([]));
        let msg = parse_message_event(&data).unwrap();
        assert_eq!(msg.text, "question about this link");
    }

    #[test]
    fn unparseable_content_is_taken_verbatim() {
        let data = message_event("text", "just plain words", "p2p", json!([]));
        let msg = parse_message_event(&data).unwrap();
        assert_eq!(msg.text, "just plain words");
    }

    #[test]
    fn event_id_extraction_order() {
        assert_eq!(
            extract_event_id(&json!({"header": {"event_id": "e-9"}})),
            "e-9"
        );
        assert_eq!(extract_event_id(&json!({"uuid": "u-1"})), "u-1");
        assert_eq!(
            extract_event_id(&json!({"event": {"message": {"message_id": "om_7"}}})),
            "msg_om_7"
        );
        assert_eq!(extract_event_id(&json!({})), "");
    }

    #[test]
    fn card_action_parses_rating() {
        let data = json!({
            "event": {
                "operator": {"open_id": "ou_rater"},
                "action": {"value": {"rating": "up", "article_id": "42"}}
            }
        });
        let feedback = parse_card_action(&data).unwrap();
        assert_eq!(feedback.rating, "up");
        assert_eq!(feedback.article_id, "42");
        assert_eq!(feedback.user_id, "ou_rater");
    }
}
