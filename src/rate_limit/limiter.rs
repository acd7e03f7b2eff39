//! Rate Limiter
//!
//! One admission algorithm behind a single "may one more unit pass?" call.

use std::time::Duration;
use tokio::time::Instant;

use super::config::{RateLimitConfig, RateLimitStrategy};
use super::token_bucket::TokenBucket;
use super::window::{FixedWindowCounter, SlidingWindowCounter};

/// A rate limiter for one logical key
#[derive(Debug, Clone)]
pub enum RateLimiter {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindowCounter),
    FixedWindow(FixedWindowCounter),
}

impl RateLimiter {
    /// Build the limiter selected by `config.strategy`
    pub fn from_config(config: &RateLimitConfig, now: Instant) -> Self {
        match config.strategy {
            RateLimitStrategy::TokenBucket | RateLimitStrategy::LeakyBucket => RateLimiter::TokenBucket(
                TokenBucket::new_at(config.bucket_capacity(), config.refill_rate(), now),
            ),
            RateLimitStrategy::SlidingWindow => RateLimiter::SlidingWindow(SlidingWindowCounter::new(
                config.max_requests,
                config.window(),
            )),
            RateLimitStrategy::FixedWindow => RateLimiter::FixedWindow(FixedWindowCounter::new_at(
                config.max_requests,
                config.window(),
                now,
            )),
        }
    }

    /// Admit one unit if capacity allows
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        match self {
            RateLimiter::TokenBucket(bucket) => bucket.try_consume_at(1, now),
            RateLimiter::SlidingWindow(window) => window.is_allowed_at(now),
            RateLimiter::FixedWindow(window) => window.is_allowed_at(now),
        }
    }

    /// Time until one more unit would be admitted
    pub fn retry_after_at(&mut self, now: Instant) -> Duration {
        match self {
            RateLimiter::TokenBucket(bucket) => bucket.time_until_available_at(1, now),
            RateLimiter::SlidingWindow(window) => window.time_until_available_at(now),
            RateLimiter::FixedWindow(window) => window.time_until_available_at(now),
        }
    }
}
