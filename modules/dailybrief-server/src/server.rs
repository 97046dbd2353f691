use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use dailybrief_common::config::EventServerConfig;
use dailybrief_pipeline::Messenger;
use dailybrief_qa::{QaEngine, RateLimiter};

use crate::crypto::{decrypt_event, verify_signature};
use crate::dedup::EventDeduplicator;
use crate::event::{
    event_type, extract_event_id, parse_card_action, parse_message_event, IncomingMessage,
};

const SIGNATURE_HEADER: &str = "x-lark-signature";
const TIMESTAMP_HEADER: &str = "x-lark-request-timestamp";
const NONCE_HEADER: &str = "x-lark-request-nonce";

const DEDUP_MAX_SIZE: usize = 10_000;
const DEDUP_TTL_SECS: i64 = 300;

pub struct AppState {
    pub config: EventServerConfig,
    pub qa: Arc<QaEngine>,
    pub limiter: Arc<RateLimiter>,
    pub messenger: Arc<dyn Messenger>,
    pub dedup: Mutex<EventDeduplicator>,
}

impl AppState {
    pub fn new(
        config: EventServerConfig,
        qa: Arc<QaEngine>,
        limiter: Arc<RateLimiter>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            config,
            qa,
            limiter,
            messenger,
            dedup: Mutex::new(EventDeduplicator::new(DEDUP_MAX_SIZE, DEDUP_TTL_SECS)),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook/event", post(handle_event))
        .route("/health", get(health))
        .route("/", get(index))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn index() -> Json<Value> {
    Json(json!({
        "service": "dailybrief-server",
        "endpoints": ["/webhook/event", "/health"],
    }))
}

async fn handle_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Ok(mut data) = serde_json::from_str::<Value>(&body) else {
        return (StatusCode::BAD_REQUEST, Json(json!({"code": 1, "msg": "invalid json"})))
            .into_response();
    };
    if !data.is_object() {
        return (StatusCode::BAD_REQUEST, Json(json!({"code": 1, "msg": "invalid json"})))
            .into_response();
    }

    // Signature check. Permissive mode logs and continues; strict mode 401s.
    if !state.config.encrypt_key.is_empty() {
        if let Some(signature) = header_str(&headers, SIGNATURE_HEADER) {
            let timestamp = header_str(&headers, TIMESTAMP_HEADER).unwrap_or_default();
            let nonce = header_str(&headers, NONCE_HEADER).unwrap_or_default();
            if !verify_signature(&timestamp, &nonce, &state.config.encrypt_key, &body, &signature) {
                warn!("Webhook signature mismatch");
                if state.config.strict_signature {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(json!({"code": 1, "msg": "invalid signature"})),
                    )
                        .into_response();
                }
            }
        }
    }

    // Encrypted events replace the body wholesale.
    if let Some(encrypted) = data["encrypt"].as_str() {
        if state.config.encrypt_key.is_empty() {
            warn!("Received encrypted event but no encrypt_key configured");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"code": 1, "msg": "encryption not configured"})),
            )
                .into_response();
        }
        match decrypt_event(encrypted, &state.config.encrypt_key) {
            Ok(plaintext) => data = plaintext,
            Err(e) => {
                warn!(error = %e, "Failed to decrypt event");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"code": 1, "msg": "decryption failed"})),
                )
                    .into_response();
            }
        }
    }

    // URL-verification challenge.
    if let Some(challenge) = data["challenge"].as_str() {
        if !token_matches(&state.config, &data) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"code": 1, "msg": "invalid token"})),
            )
                .into_response();
        }
        info!("Answering url-verification challenge");
        return Json(json!({"challenge": challenge})).into_response();
    }

    if !token_matches(&state.config, &data) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"code": 1, "msg": "invalid token"})),
        )
            .into_response();
    }

    // Dedup: replays inside the TTL are acknowledged and dropped.
    let event_id = extract_event_id(&data);
    {
        let mut dedup = state.dedup.lock().await;
        if dedup.is_duplicate(&event_id) {
            info!(event_id, "Duplicate event, skipping");
            return Json(json!({"code": 0, "msg": "duplicate"})).into_response();
        }
    }

    match event_type(&data) {
        "im.message.receive_v1" | "message" => handle_message(state, &data),
        "card.action.trigger" | "interactive" => return handle_card(&data),
        other => {
            info!(event_type = other, "Ignoring event");
        }
    }

    Json(json!({"code": 0, "msg": "ok"})).into_response()
}

/// Ack immediately; retrieval and synthesis run on a detached task so the
/// platform doesn't retry the delivery.
fn handle_message(state: Arc<AppState>, data: &Value) {
    let Some(message) = parse_message_event(data) else {
        warn!("Unparseable message event");
        return;
    };
    if !message.requires_response() || message.text.trim().is_empty() {
        return;
    }

    tokio::spawn(async move {
        answer_message(state, message).await;
    });
}

async fn answer_message(state: Arc<AppState>, message: IncomingMessage) {
    let verdict = state.limiter.allow(&message.sender_id);
    if !verdict.allowed {
        let reply = verdict
            .error
            .map(|e| format!("{} (retry after {}s)", e.message, e.retry_after))
            .unwrap_or_else(|| "请求过于频繁，请稍后再试。".to_string());
        if let Err(e) = state.messenger.reply_message(&message.message_id, &reply).await {
            warn!(error = %e, "Failed to send rate-limit reply");
        }
        return;
    }

    let response = state
        .qa
        .process_query(&message.text, &message.sender_id, Some(&message.chat_id))
        .await;

    let mut reply = response.answer.clone();
    if !response.sources.is_empty() {
        reply.push_str("\n\n来源:");
        for source in response.sources.iter().take(5) {
            reply.push_str(&format!("\n- {} {}", source.title, source.url));
        }
    }

    if let Err(e) = state.messenger.reply_message(&message.message_id, &reply).await {
        warn!(error = %e, "Failed to send QA reply");
    }
}

/// Feedback callback: record the rating, acknowledge with a toast.
fn handle_card(data: &Value) -> Response {
    match parse_card_action(data) {
        Some(feedback) => {
            info!(
                user = %feedback.user_id,
                article = %feedback.article_id,
                rating = %feedback.rating,
                "Feedback recorded"
            );
            Json(json!({
                "toast": {"type": "success", "content": "感谢反馈！"}
            }))
            .into_response()
        }
        None => Json(json!({"code": 0, "msg": "ok"})).into_response(),
    }
}

fn token_matches(config: &EventServerConfig, data: &Value) -> bool {
    if config.verification_token.is_empty() {
        return true;
    }
    let token = data["token"]
        .as_str()
        .or_else(|| data["header"]["token"].as_str())
        .unwrap_or_default();
    token == config.verification_token
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
