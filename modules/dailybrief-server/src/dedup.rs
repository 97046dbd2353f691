use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

/// Event-id dedup cache: bounded size, per-entry TTL. The platform redelivers
/// events until acknowledged, so replays inside the TTL must be dropped.
pub struct EventDeduplicator {
    max_size: usize,
    ttl: Duration,
    seen: HashMap<String, DateTime<Utc>>,
    order: VecDeque<String>,
}

impl EventDeduplicator {
    pub fn new(max_size: usize, ttl_secs: i64) -> Self {
        Self {
            max_size: max_size.max(1),
            ttl: Duration::seconds(ttl_secs),
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record the id and report whether it was already seen inside the TTL.
    /// Empty ids are never considered duplicates.
    pub fn is_duplicate(&mut self, event_id: &str) -> bool {
        self.is_duplicate_at(event_id, Utc::now())
    }

    pub fn is_duplicate_at(&mut self, event_id: &str, now: DateTime<Utc>) -> bool {
        if event_id.is_empty() {
            return false;
        }

        self.expire(now);

        if self.seen.contains_key(event_id) {
            return true;
        }

        self.seen.insert(event_id.to_string(), now);
        self.order.push_back(event_id.to_string());
        while self.seen.len() > self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            } else {
                break;
            }
        }
        false
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.order.front() {
            match self.seen.get(front) {
                Some(at) if now - *at > self.ttl => {
                    let expired = self.order.pop_front().unwrap_or_default();
                    self.seen.remove(&expired);
                }
                Some(_) => break,
                // Already evicted by the size cap.
                None => {
                    self.order.pop_front();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}
