use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use dailybrief_common::config::RateLimitConfig;

use crate::models::canned;

/// Reserved key carrying the global (all-users) request list.
const GLOBAL_KEY: &str = "__global__";

/// Outcome of a rate-limit check.
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: usize,
    /// Seconds until a slot frees up.
    pub reset_after: f64,
    /// Canned user-facing message when rejected.
    pub error: Option<RateLimitError>,
}

#[derive(Debug, Clone)]
pub struct RateLimitError {
    pub message: String,
    pub retry_after: u64,
}

/// Sliding-window limiter with a global ceiling and a per-user ceiling. Both
/// windows must have room before a request is admitted and recorded.
pub struct RateLimiter {
    global_max: usize,
    user_max: usize,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            global_max: config.requests_per_minute,
            user_max: config.requests_per_user_minute,
            window: Duration::seconds(config.window_secs),
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Admit-or-reject. On admit the request is recorded against both the
    /// global and the user window.
    pub fn allow(&self, user_id: &str) -> RateLimitResult {
        self.allow_at(user_id, Utc::now())
    }

    pub fn allow_at(&self, user_id: &str, now: DateTime<Utc>) -> RateLimitResult {
        let mut requests = self.requests.lock().expect("rate limiter lock");

        let (global_count, global_reset) =
            prune_and_measure(&mut requests, GLOBAL_KEY, now, self.window);
        if global_count >= self.global_max {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_after: global_reset,
                error: Some(RateLimitError {
                    message: canned::RATE_LIMITED_GLOBAL.to_string(),
                    retry_after: global_reset.ceil() as u64,
                }),
            };
        }

        let (user_count, user_reset) = prune_and_measure(&mut requests, user_id, now, self.window);
        if user_count >= self.user_max {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_after: user_reset,
                error: Some(RateLimitError {
                    message: canned::RATE_LIMITED_USER.to_string(),
                    retry_after: user_reset.ceil() as u64,
                }),
            };
        }

        requests.entry(GLOBAL_KEY.to_string()).or_default().push(now);
        requests.entry(user_id.to_string()).or_default().push(now);

        RateLimitResult {
            allowed: true,
            remaining: (self.global_max - global_count)
                .min(self.user_max - user_count)
                .saturating_sub(1),
            reset_after: global_reset.max(user_reset),
            error: None,
        }
    }

    /// Check both ceilings without recording anything.
    pub fn check(&self, user_id: &str) -> bool {
        self.check_at(user_id, Utc::now())
    }

    pub fn check_at(&self, user_id: &str, now: DateTime<Utc>) -> bool {
        let mut requests = self.requests.lock().expect("rate limiter lock");
        let (global_count, _) = prune_and_measure(&mut requests, GLOBAL_KEY, now, self.window);
        if global_count >= self.global_max {
            return false;
        }
        let (user_count, _) = prune_and_measure(&mut requests, user_id, now, self.window);
        user_count < self.user_max
    }

    /// Remaining quota for a user (the tighter of the two windows).
    pub fn remaining(&self, user_id: &str) -> usize {
        self.remaining_at(user_id, Utc::now())
    }

    pub fn remaining_at(&self, user_id: &str, now: DateTime<Utc>) -> usize {
        let mut requests = self.requests.lock().expect("rate limiter lock");
        let (global_count, _) = prune_and_measure(&mut requests, GLOBAL_KEY, now, self.window);
        let (user_count, _) = prune_and_measure(&mut requests, user_id, now, self.window);
        (self.global_max.saturating_sub(global_count)).min(self.user_max.saturating_sub(user_count))
    }

    pub fn reset(&self, user_id: Option<&str>) {
        let mut requests = self.requests.lock().expect("rate limiter lock");
        match user_id {
            Some(user) => {
                requests.remove(user);
            }
            None => requests.clear(),
        }
    }
}

/// Drop timestamps outside the window, then report (count, seconds until the
/// oldest surviving timestamp leaves the window).
fn prune_and_measure(
    requests: &mut HashMap<String, Vec<DateTime<Utc>>>,
    key: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> (usize, f64) {
    let cutoff = now - window;
    let entry = requests.entry(key.to_string()).or_default();
    entry.retain(|t| *t > cutoff);

    let reset = entry
        .iter()
        .min()
        .map(|oldest| {
            let until = *oldest + window - now;
            (until.num_milliseconds() as f64 / 1000.0).max(0.0)
        })
        .unwrap_or(0.0);

    (entry.len(), reset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(global: usize, user: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            requests_per_minute: global,
            requests_per_user_minute: user,
            window_secs: 60,
        })
    }

    #[test]
    fn user_ceiling_rejects_third_request() {
        let limiter = limiter(100, 2);
        let now = Utc::now();

        let r1 = limiter.allow_at("u1", now);
        assert!(r1.allowed);
        assert_eq!(r1.remaining, 1);

        let r2 = limiter.allow_at("u1", now + Duration::seconds(5));
        assert!(r2.allowed);

        let r3 = limiter.allow_at("u1", now + Duration::seconds(10));
        assert!(!r3.allowed);
        let error = r3.error.expect("rejection carries an error");
        assert!(error.retry_after > 0 && error.retry_after <= 60);
    }

    #[test]
    fn global_ceiling_spans_users() {
        let limiter = limiter(3, 10);
        let now = Utc::now();
        assert!(limiter.allow_at("a", now).allowed);
        assert!(limiter.allow_at("b", now).allowed);
        assert!(limiter.allow_at("c", now).allowed);
        let rejected = limiter.allow_at("d", now);
        assert!(!rejected.allowed);
        assert!(rejected
            .error
            .unwrap()
            .message
            .contains("系统"));
    }

    #[test]
    fn window_slides_and_frees_quota() {
        let limiter = limiter(100, 2);
        let now = Utc::now();
        assert!(limiter.allow_at("u1", now).allowed);
        assert!(limiter.allow_at("u1", now + Duration::seconds(1)).allowed);
        assert!(!limiter.allow_at("u1", now + Duration::seconds(30)).allowed);
        // First request leaves the window after 60 s.
        assert!(limiter.allow_at("u1", now + Duration::seconds(61)).allowed);
    }

    #[test]
    fn ceiling_never_exceeded_within_any_window() {
        let limiter = limiter(100, 5);
        let start = Utc::now();
        let mut admitted = Vec::new();
        for i in 0..30 {
            let at = start + Duration::seconds(i * 4);
            if limiter.allow_at("u1", at).allowed {
                admitted.push(at);
            }
        }
        for anchor in &admitted {
            let in_window = admitted
                .iter()
                .filter(|t| **t >= *anchor && **t < *anchor + Duration::seconds(60))
                .count();
            assert!(in_window <= 5, "window starting {anchor} admitted {in_window}");
        }
    }

    #[test]
    fn check_does_not_consume_quota() {
        let limiter = limiter(100, 1);
        let now = Utc::now();
        assert!(limiter.check_at("u1", now));
        assert!(limiter.check_at("u1", now));
        assert!(limiter.allow_at("u1", now).allowed);
        assert!(!limiter.check_at("u1", now));
    }

    #[test]
    fn remaining_reports_tighter_ceiling() {
        let limiter = limiter(3, 10);
        let now = Utc::now();
        limiter.allow_at("a", now);
        limiter.allow_at("b", now);
        // Global has 1 slot left; user "c" is fresh.
        assert_eq!(limiter.remaining_at("c", now), 1);
    }

    #[test]
    fn reset_clears_user_or_all() {
        let limiter = limiter(100, 1);
        let now = Utc::now();
        limiter.allow_at("u1", now);
        assert!(!limiter.check_at("u1", now));
        limiter.reset(Some("u1"));
        assert!(limiter.check_at("u1", now));
        limiter.allow_at("u1", now);
        limiter.reset(None);
        assert!(limiter.check_at("u1", now));
    }
}
