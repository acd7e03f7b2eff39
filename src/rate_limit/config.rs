//! Rate Limit Configuration
//!
//! Configuration for the global per-key rate limiter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default rate limits
pub const DEFAULT_MAX_REQUESTS: u32 = 100; // requests per window
pub const DEFAULT_WINDOW_MS: u64 = 60_000; // one minute

/// Admission algorithm used for each rate-limited key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    FixedWindow,
    #[default]
    SlidingWindow,
    TokenBucket,
    /// Served by a token bucket
    LeakyBucket,
}

impl fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateLimitStrategy::FixedWindow => "fixed_window",
            RateLimitStrategy::SlidingWindow => "sliding_window",
            RateLimitStrategy::TokenBucket => "token_bucket",
            RateLimitStrategy::LeakyBucket => "leaky_bucket",
        };
        f.write_str(name)
    }
}

impl FromStr for RateLimitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed_window" => Ok(RateLimitStrategy::FixedWindow),
            "sliding_window" => Ok(RateLimitStrategy::SlidingWindow),
            "token_bucket" => Ok(RateLimitStrategy::TokenBucket),
            "leaky_bucket" => Ok(RateLimitStrategy::LeakyBucket),
            other => Err(format!("unknown rate limit strategy: {}", other)),
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    pub max_requests: u32,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// Token bucket capacity (defaults to `max_requests`)
    pub burst_limit: Option<u32>,

    /// Token bucket refill rate in tokens per second
    /// (defaults to `max_requests` spread over the window)
    pub recovery_rate: Option<f64>,

    /// Admission algorithm
    pub strategy: RateLimitStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            burst_limit: None,
            recovery_rate: None,
            strategy: RateLimitStrategy::SlidingWindow,
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new(max_requests: u32, window_ms: u64, strategy: RateLimitStrategy) -> Self {
        Self {
            max_requests,
            window_ms,
            strategy,
            ..Self::default()
        }
    }

    /// Get window duration
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Token bucket capacity
    pub fn bucket_capacity(&self) -> u32 {
        self.burst_limit.unwrap_or(self.max_requests)
    }

    /// Token bucket refill rate (tokens per second)
    pub fn refill_rate(&self) -> f64 {
        match self.recovery_rate {
            Some(rate) => rate,
            None => self.max_requests as f64 / self.window().as_secs_f64(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window_ms == 0 {
            return Err("rate limit window_ms must be greater than zero".to_string());
        }
        if let Some(rate) = self.recovery_rate {
            if !rate.is_finite() || rate < 0.0 {
                return Err(format!("rate limit recovery_rate must be >= 0, got {}", rate));
            }
        }
        Ok(())
    }
}
