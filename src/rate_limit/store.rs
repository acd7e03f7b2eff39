//! Limiter Store
//!
//! Keyed registry of rate limiters, one per `"<request_type>:<user|global>"`.
//! The map lock is only held to look up or insert an entry; admission itself
//! locks the single entry, so different keys never contend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::config::RateLimitConfig;
use super::limiter::RateLimiter;
use crate::types::{RequestContext, RequestType};

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,

    /// Limiter key that was checked
    pub key: String,

    /// Time until a unit is available (if not allowed)
    pub retry_after: Option<Duration>,
}

impl RateLimitResult {
    /// Create an allowed result
    pub fn allowed(key: String) -> Self {
        Self {
            allowed: true,
            key,
            retry_after: None,
        }
    }

    /// Create a denied result
    pub fn denied(key: String, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            key,
            retry_after: Some(retry_after),
        }
    }
}

#[derive(Debug)]
struct LimiterEntry {
    limiter: RateLimiter,
    last_used: Instant,
}

/// Build the limiter key for a request
pub fn limiter_key(request_type: &RequestType, context: &RequestContext) -> String {
    format!("{}:{}", request_type, context.subject())
}

/// In-memory limiter store
#[derive(Debug, Clone)]
pub struct LimiterStore {
    config: Arc<RwLock<RateLimitConfig>>,
    limiters: Arc<RwLock<HashMap<String, Arc<Mutex<LimiterEntry>>>>>,
}

impl LimiterStore {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            limiters: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Try to admit one unit for `key`
    pub async fn try_acquire(&self, key: &str) -> RateLimitResult {
        self.try_acquire_at(key, Instant::now()).await
    }

    pub async fn try_acquire_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let entry = self.get_or_create(key, now).await;
        let mut entry = entry.lock().await;
        entry.last_used = now;

        if entry.limiter.try_acquire_at(now) {
            RateLimitResult::allowed(key.to_string())
        } else {
            let retry_after = entry.limiter.retry_after_at(now);
            debug!(key = %key, retry_after_ms = retry_after.as_millis() as u64, "Rate limit hit");
            RateLimitResult::denied(key.to_string(), retry_after)
        }
    }

    async fn get_or_create(&self, key: &str, now: Instant) -> Arc<Mutex<LimiterEntry>> {
        if let Some(entry) = self.limiters.read().await.get(key) {
            return entry.clone();
        }

        let config = self.config.read().await.clone();
        let mut limiters = self.limiters.write().await;
        limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(LimiterEntry {
                    limiter: RateLimiter::from_config(&config, now),
                    last_used: now,
                }))
            })
            .clone()
    }

    /// Drop limiters not used within `ttl`; returns how many were removed
    pub async fn cleanup_idle(&self, ttl: Duration) -> usize {
        self.cleanup_idle_at(ttl, Instant::now()).await
    }

    pub async fn cleanup_idle_at(&self, ttl: Duration, now: Instant) -> usize {
        let mut limiters = self.limiters.write().await;
        let before = limiters.len();
        limiters.retain(|_, entry| match entry.try_lock() {
            Ok(entry) => now.saturating_duration_since(entry.last_used) < ttl,
            // In use right now, so not idle
            Err(_) => true,
        });
        before - limiters.len()
    }

    /// Idle time after which a limiter is dropped
    pub async fn idle_ttl(&self) -> Duration {
        self.config.read().await.window().max(Duration::from_secs(3600))
    }

    /// Replace the configuration; existing limiters are discarded
    pub async fn set_config(&self, config: RateLimitConfig) {
        *self.config.write().await = config;
        self.limiters.write().await.clear();
    }

    pub async fn config(&self) -> RateLimitConfig {
        self.config.read().await.clone()
    }

    /// Get limiter count
    pub async fn count(&self) -> usize {
        self.limiters.read().await.len()
    }
}

impl Default for LimiterStore {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
