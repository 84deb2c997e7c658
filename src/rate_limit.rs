use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::models::Id;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits; posts cover questions, answers and comments.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub post_limit: usize,
    pub post_window: Duration,
    pub vote_limit: usize,
    pub vote_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            post_limit: 10,
            post_window: Duration::from_secs(60),
            vote_limit: 60,
            vote_window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            post_limit: usize_env("RL_POST_LIMIT", d.post_limit),
            post_window: dur_env("RL_POST_WINDOW", d.post_window),
            vote_limit: usize_env("RL_VOTE_LIMIT", d.vote_limit),
            vote_window: dur_env("RL_VOTE_WINDOW", d.vote_window),
        }
    }
}

/// High level guard used by handlers, keyed by acting user.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_post(&self, user_id: Id) -> bool { self.limiter.check(&format!("post:{user_id}"), self.cfg.post_limit, self.cfg.post_window) }
    pub fn allow_vote(&self, user_id: Id) -> bool { self.limiter.check(&format!("vote:{user_id}"), self.cfg.vote_limit, self.cfg.vote_window) }
}
