use crate::config::RateLimitConfig;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request admitted
    Allowed { limit: u32, remaining: u32 },
    /// Request rejected; no further work may be done for it
    Limited { limit: u32, retry_after: Duration },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct TokenWindow {
    started: Instant,
    count: u32,
}

/// Per-token request counter over a rolling window.
///
/// A token's window opens at its first request and lasts `window`; the next
/// request after that opens a fresh one. Windows live in an LRU table of
/// `max_unique_tokens` entries, so a new token arriving at a full table
/// evicts the least recently seen one. Increment and compare happen under one
/// lock.
pub struct RateLimiter {
    window: Duration,
    default_limit: u32,
    tokens: Mutex<LruCache<String, TokenWindow>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_unique_tokens).unwrap_or(NonZeroUsize::MIN);
        Self {
            window: config.window(),
            default_limit: config.max_requests_per_token,
            tokens: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Configured per-token cap
    pub fn default_limit(&self) -> u32 {
        self.default_limit
    }

    /// Count a request for `token` and admit it while the window's count stays within `limit`
    pub fn check(&self, token: &str, limit: u32) -> RateLimitDecision {
        self.check_at(token, limit, Instant::now())
    }

    fn check_at(&self, token: &str, limit: u32, now: Instant) -> RateLimitDecision {
        let mut tokens = self.tokens.lock();

        let mut window = match tokens.get(token) {
            Some(w) if now.saturating_duration_since(w.started) < self.window => *w,
            _ => TokenWindow {
                started: now,
                count: 0,
            },
        };
        window.count = window.count.saturating_add(1);

        if let Some((evicted, _)) = tokens.push(token.to_string(), window) {
            if evicted != token {
                debug!(evicted = %evicted, "Evicted least recently seen rate limit token");
            }
        }

        trace!(token = %token, count = window.count, limit, "Rate limit check");

        if window.count <= limit {
            RateLimitDecision::Allowed {
                limit,
                remaining: limit - window.count,
            }
        } else {
            let elapsed = now.saturating_duration_since(window.started);
            RateLimitDecision::Limited {
                limit,
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }

    /// Number of tokens currently tracked (useful for testing)
    pub fn tracked_tokens(&self) -> usize {
        self.tokens.lock().len()
    }
}

/// Builder for creating RateLimiter with custom settings
pub struct RateLimiterBuilder {
    config: RateLimitConfig,
}

impl RateLimiterBuilder {
    pub fn new() -> Self {
        Self {
            config: RateLimitConfig::default(),
        }
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window_ms = window.as_millis() as u64;
        self
    }

    pub fn max_unique_tokens(mut self, max: usize) -> Self {
        self.config.max_unique_tokens = max;
        self
    }

    pub fn max_requests_per_token(mut self, max: u32) -> Self {
        self.config.max_requests_per_token = max;
        self
    }

    pub fn build(self) -> RateLimiter {
        RateLimiter::new(&self.config)
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
