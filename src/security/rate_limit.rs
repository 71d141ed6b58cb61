//! Fixed-window per-(user,tool,source) rate limiter (C7).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// `{limit, window}` as named in the tool/role configuration that produced it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub window_ms: u64,
}

impl RateLimit {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as u64,
        }
    }
}

struct Window {
    count: u64,
    reset_at: Instant,
    limit: u64,
    window_ms: u64,
}

pub struct RateLimitCheck {
    pub allowed: bool,
    pub current_count: u64,
    pub limit: u64,
    pub reset_at: Instant,
    pub time_left: Option<Duration>,
}

/// Identifies which configuration location produced the limit in effect.
pub type RateLimitSource = String;

#[derive(Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<(String, String, String), Window>>,
}

impl RateLimiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn check(&self, user_id: &str, tool_name: &str, source: &str, limit: RateLimit) -> RateLimitCheck {
        let key = (user_id.to_string(), tool_name.to_string(), source.to_string());
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        let window = windows.entry(key).or_insert_with(|| Window {
            count: 0,
            reset_at: now,
            limit: limit.limit,
            window_ms: limit.window_ms,
        });

        if window.reset_at <= now {
            window.count = 1;
            window.reset_at = now + Duration::from_millis(limit.window_ms);
            window.limit = limit.limit;
            window.window_ms = limit.window_ms;
            return RateLimitCheck {
                allowed: true,
                current_count: 1,
                limit: limit.limit,
                reset_at: window.reset_at,
                time_left: None,
            };
        }

        window.count += 1;
        let allowed = window.count <= window.limit;
        RateLimitCheck {
            allowed,
            current_count: window.count,
            limit: window.limit,
            reset_at: window.reset_at,
            time_left: Some(window.reset_at.saturating_duration_since(now)),
        }
    }

    pub fn clear(&self, user_id: Option<&str>) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        match user_id {
            Some(user_id) => windows.retain(|(u, _, _), _| u != user_id),
            None => windows.clear(),
        }
    }

    /// Opportunistically removes long-stale windows. Intended to run on a
    /// background interval the owner controls (see `SecurityGate`).
    pub fn sweep_stale(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, w| {
            let stale_after = w.reset_at + Duration::from_millis(3 * w.window_ms);
            stale_after > now
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_in_window_is_allowed() {
        let limiter = RateLimiter::new();
        let check = limiter.check("u1", "tool", "role", RateLimit::new(2, Duration::from_secs(60)));
        assert!(check.allowed);
        assert_eq!(check.current_count, 1);
    }

    #[test]
    fn exceeding_limit_denies_further_requests() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(2, Duration::from_secs(60));
        assert!(limiter.check("u1", "tool", "role", limit).allowed);
        assert!(limiter.check("u1", "tool", "role", limit).allowed);
        assert!(!limiter.check("u1", "tool", "role", limit).allowed);
    }

    #[test]
    fn clear_resets_one_user() {
        let limiter = RateLimiter::new();
        let limit = RateLimit::new(1, Duration::from_secs(60));
        limiter.check("u1", "tool", "role", limit);
        limiter.check("u2", "tool", "role", limit);
        limiter.clear(Some("u1"));
        assert!(limiter.check("u1", "tool", "role", limit).allowed);
        assert!(!limiter.check("u2", "tool", "role", limit).allowed);
    }
}
