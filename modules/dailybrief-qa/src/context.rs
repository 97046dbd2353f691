use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::ConversationTurn;

struct UserContext {
    turns: Vec<ConversationTurn>,
    last_active: DateTime<Utc>,
}

/// Per-user bounded conversation history with idle expiry. A single mutex
/// guards the whole map; operations are short.
pub struct ContextManager {
    max_history: usize,
    ttl: Duration,
    contexts: Mutex<HashMap<String, UserContext>>,
}

impl ContextManager {
    pub fn new(max_history: usize, ttl_secs: i64) -> Self {
        Self {
            max_history: max_history.max(1),
            ttl: Duration::seconds(ttl_secs),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_turn(&self, user_id: &str, turn: ConversationTurn) {
        self.add_turn_at(user_id, turn, Utc::now());
    }

    pub fn add_turn_at(&self, user_id: &str, turn: ConversationTurn, now: DateTime<Utc>) {
        let mut contexts = self.contexts.lock().expect("context lock");
        let ctx = contexts.entry(user_id.to_string()).or_insert_with(|| UserContext {
            turns: Vec::new(),
            last_active: now,
        });
        ctx.turns.push(turn);
        if ctx.turns.len() > self.max_history {
            let drop = ctx.turns.len() - self.max_history;
            ctx.turns.drain(..drop);
        }
        ctx.last_active = now;
    }

    /// The user's turns in chronological order. An expired context returns
    /// empty and is evicted.
    pub fn get_context(&self, user_id: &str) -> Vec<ConversationTurn> {
        self.get_context_at(user_id, Utc::now())
    }

    pub fn get_context_at(&self, user_id: &str, now: DateTime<Utc>) -> Vec<ConversationTurn> {
        let mut contexts = self.contexts.lock().expect("context lock");
        match contexts.get(user_id) {
            Some(ctx) if now - ctx.last_active > self.ttl => {
                contexts.remove(user_id);
                debug!(user_id, "Evicted expired conversation context");
                Vec::new()
            }
            Some(ctx) => ctx.turns.clone(),
            None => Vec::new(),
        }
    }

    pub fn clear_context(&self, user_id: &str) {
        let mut contexts = self.contexts.lock().expect("context lock");
        contexts.remove(user_id);
    }

    /// Sweep every expired context. Returns how many were evicted.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut contexts = self.contexts.lock().expect("context lock");
        let before = contexts.len();
        contexts.retain(|_, ctx| now - ctx.last_active <= self.ttl);
        before - contexts.len()
    }

    pub fn active_users(&self) -> usize {
        self.contexts.lock().expect("context lock").len()
    }
}
