// Webhook behavior against a stubbed QA stack and messenger: challenge
// exchange, dedup idempotence, rate limiting, malformed input.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Mutex;
use tower::ServiceExt;

use ai_client::ChatAgent;
use dailybrief_common::config::{
    ChunkingConfig, EventServerConfig, QaEngineConfig, RateLimitConfig, RetrievalConfig,
};
use dailybrief_pipeline::Messenger;
use dailybrief_qa::{
    ContextManager, EnhancedRetriever, KnowledgeBase, QaEngine, RateLimiter, SnapshotIndex,
    TextEmbedder,
};
use dailybrief_server::{router, AppState};

struct StubEmbedder;

#[async_trait]
impl TextEmbedder for StubEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
    fn dimension(&self) -> usize {
        2
    }
}

struct StubAgent;

#[async_trait]
impl ChatAgent for StubAgent {
    async fn chat(&self, _system: &str, _user: &str) -> Result<String> {
        Ok("stubbed answer".to_string())
    }
}

#[derive(Default)]
struct RecordingMessenger {
    replies: Mutex<Vec<String>>,
    reply_count: AtomicUsize,
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, _r: &str, _t: &str) -> Result<()> {
        Ok(())
    }
    async fn send_rich_text(&self, _r: &str, _t: &str, _c: Value) -> Result<()> {
        Ok(())
    }
    async fn send_card(&self, _r: &str, _c: Value) -> Result<()> {
        Ok(())
    }
    async fn reply_message(&self, _message_id: &str, text: &str) -> Result<()> {
        self.replies.lock().unwrap().push(text.to_string());
        self.reply_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestServer {
    app: axum::Router,
    messenger: Arc<RecordingMessenger>,
    _dir: tempfile::TempDir,
}

fn test_server(config: EventServerConfig, user_limit: usize) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(SnapshotIndex::open(dir.path(), "test").unwrap());
    let kb = Arc::new(
        KnowledgeBase::new(index, Arc::new(StubEmbedder), &ChunkingConfig::default()).unwrap(),
    );
    let retriever = Arc::new(EnhancedRetriever::new(kb, RetrievalConfig::default()));
    let context = Arc::new(ContextManager::new(5, 1800));
    let qa = Arc::new(QaEngine::new(
        retriever,
        context,
        Arc::new(StubAgent),
        QaEngineConfig::default(),
    ));
    let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
        requests_per_minute: 100,
        requests_per_user_minute: user_limit,
        window_secs: 60,
    }));
    let messenger = Arc::new(RecordingMessenger::default());

    let state = Arc::new(AppState::new(
        config,
        qa,
        limiter,
        Arc::clone(&messenger) as Arc<dyn Messenger>,
    ));

    TestServer {
        app: router(state),
        messenger,
        _dir: dir,
    }
}

async fn post_event(app: &axum::Router, body: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::post("/webhook/event")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn message_event(event_id: &str, sender: &str, text: &str) -> String {
    json!({
        "header": {"event_id": event_id, "event_type": "im.message.receive_v1"},
        "event": {
            "sender": {"sender_id": {"open_id": sender}},
            "message": {
                "message_id": format!("om_{event_id}"),
                "chat_id": "oc_1",
                "chat_type": "p2p",
                "message_type": "text",
                "content": json!({"text": text}).to_string(),
                "mentions": []
            }
        }
    })
    .to_string()
}

async fn wait_for_replies(messenger: &RecordingMessenger, expected: usize) {
    for _ in 0..100 {
        if messenger.reply_count.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn health_and_index_respond() {
    let server = test_server(EventServerConfig::default(), 10);
    let response = server
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .app
        .clone()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_json_is_rejected() {
    let server = test_server(EventServerConfig::default(), 10);
    let (status, _) = post_event(&server.app, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn challenge_is_echoed() {
    let server = test_server(EventServerConfig::default(), 10);
    let body = json!({"challenge": "abc-123", "type": "url_verification"}).to_string();
    let (status, value) = post_event(&server.app, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["challenge"].as_str(), Some("abc-123"));
}

#[tokio::test]
async fn challenge_with_wrong_token_is_unauthorized() {
    let config = EventServerConfig {
        verification_token: "expected".to_string(),
        ..EventServerConfig::default()
    };
    let server = test_server(config, 10);
    let body = json!({"challenge": "abc", "token": "wrong"}).to_string();
    let (status, _) = post_event(&server.app, &body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let body = json!({"challenge": "abc", "token": "expected"}).to_string();
    let (status, value) = post_event(&server.app, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["challenge"].as_str(), Some("abc"));
}

#[tokio::test]
async fn duplicate_event_triggers_one_qa_task() {
    let server = test_server(EventServerConfig::default(), 10);
    let body = message_event("e-123", "ou_u1", "什么是RAG?");

    let (status1, _) = post_event(&server.app, &body).await;
    let (status2, value2) = post_event(&server.app, &body).await;
    assert_eq!(status1, StatusCode::OK);
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(value2["msg"].as_str(), Some("duplicate"));

    wait_for_replies(&server.messenger, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        server.messenger.reply_count.load(Ordering::SeqCst),
        1,
        "exactly one downstream QA reply"
    );
}

#[tokio::test]
async fn rate_limit_rejects_third_request() {
    let server = test_server(EventServerConfig::default(), 2);
    for i in 0..3 {
        let body = message_event(&format!("e-{i}"), "ou_limited", "question");
        let (status, _) = post_event(&server.app, &body).await;
        assert_eq!(status, StatusCode::OK, "webhook always acks");
    }

    wait_for_replies(&server.messenger, 3).await;
    let replies = server.messenger.replies.lock().unwrap().clone();
    assert_eq!(replies.len(), 3);
    let limited: Vec<&String> = replies.iter().filter(|r| r.contains("retry after")).collect();
    assert_eq!(limited.len(), 1, "third request is rate limited: {replies:?}");
}

#[tokio::test]
async fn unknown_event_types_are_acked() {
    let server = test_server(EventServerConfig::default(), 10);
    let body = json!({
        "header": {"event_id": "e-x", "event_type": "im.chat.updated_v1"}
    })
    .to_string();
    let (status, value) = post_event(&server.app, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["code"].as_i64(), Some(0));
}

#[tokio::test]
async fn card_action_returns_toast() {
    let server = test_server(EventServerConfig::default(), 10);
    let body = json!({
        "header": {"event_id": "e-card", "event_type": "card.action.trigger"},
        "event": {
            "operator": {"open_id": "ou_rater"},
            "action": {"value": {"rating": "up", "article_id": "7"}}
        }
    })
    .to_string();
    let (status, value) = post_event(&server.app, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["toast"]["type"].as_str(), Some("success"));
}

#[tokio::test]
async fn encrypted_event_round_trip() {
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
    use base64::Engine;
    use sha2::Digest;

    let encrypt_key = "unit-test-key";
    let config = EventServerConfig {
        encrypt_key: encrypt_key.to_string(),
        ..EventServerConfig::default()
    };
    let server = test_server(config, 10);

    let plaintext = json!({"challenge": "enc-challenge"}).to_string();
    let key = sha2::Sha256::digest(encrypt_key.as_bytes());
    let iv = [9u8; 16];
    let ciphertext = cbc::Encryptor::<aes::Aes256>::new_from_slices(&key, &iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    let mut payload = iv.to_vec();
    payload.extend(ciphertext);
    let body = json!({
        "encrypt": base64::engine::general_purpose::STANDARD.encode(payload)
    })
    .to_string();

    let (status, value) = post_event(&server.app, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["challenge"].as_str(), Some("enc-challenge"));
}
