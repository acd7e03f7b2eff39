//! Token Bucket
//!
//! Continuous-refill token bucket. Refill is pull-based: tokens are added
//! lazily on every access in proportion to the time elapsed since the last
//! refill, so no background timer is needed. Two accesses at the same instant
//! see no refill.

use std::time::Duration;
use tokio::time::Instant;

/// Token bucket for rate limiting
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum capacity
    max_tokens: f64,

    /// Current tokens
    tokens: f64,

    /// Refill rate (tokens per second)
    refill_rate: f64,

    /// Last refill time
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(max_tokens: u32, refill_rate: f64) -> Self {
        Self::new_at(max_tokens, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`
    pub fn new_at(max_tokens: u32, refill_rate: f64, now: Instant) -> Self {
        Self {
            max_tokens: max_tokens as f64,
            tokens: max_tokens as f64,
            refill_rate: refill_rate.max(0.0),
            last_refill: now,
        }
    }

    /// Try to consume tokens
    ///
    /// Returns true if the tokens were consumed, false if the bucket holds
    /// fewer than `n` tokens (in which case nothing is consumed).
    pub fn try_consume(&mut self, n: u32) -> bool {
        self.try_consume_at(n, Instant::now())
    }

    pub fn try_consume_at(&mut self, n: u32, now: Instant) -> bool {
        self.refill(now);

        let n = n as f64;
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Current token count after refill, without consuming
    pub fn token_count(&mut self) -> f64 {
        self.token_count_at(Instant::now())
    }

    pub fn token_count_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Get time until `n` tokens are available
    pub fn time_until_available(&mut self, n: u32) -> Duration {
        self.time_until_available_at(n, Instant::now())
    }

    pub fn time_until_available_at(&mut self, n: u32, now: Instant) -> Duration {
        self.refill(now);

        let needed = n as f64 - self.tokens;
        if needed <= 0.0 {
            return Duration::ZERO;
        }
        if self.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        // Tiny rates overflow Duration
        Duration::try_from_secs_f64(needed / self.refill_rate).unwrap_or(Duration::MAX)
    }

    /// Maximum capacity
    pub fn capacity(&self) -> u32 {
        self.max_tokens as u32
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_token_bucket_creation() {
        let mut bucket = TokenBucket::new(100, 10.0);
        assert_eq!(bucket.capacity(), 100);
        assert_eq!(bucket.token_count(), 100.0);
    }

    #[test]
    fn test_token_bucket_consume() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 10.0, start);

        assert!(bucket.try_consume_at(50, start));
        assert_eq!(bucket.token_count_at(start), 50.0);
    }

    #[test]
    fn test_token_bucket_insufficient() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 10.0, start);

        assert!(bucket.try_consume_at(100, start));
        assert!(!bucket.try_consume_at(1, start));
        // A failed consume leaves the bucket untouched
        assert_eq!(bucket.token_count_at(start), 0.0);
    }

    #[test]
    fn test_no_refill_without_elapsed_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(5, 1000.0, start);

        assert!(bucket.try_consume_at(5, start));
        assert!(!bucket.try_consume_at(1, start));
        assert!(!bucket.try_consume_at(1, start));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(10, 5.0, start);

        assert!(bucket.try_consume_at(10, start));
        let later = start + Duration::from_secs(60);
        assert_eq!(bucket.token_count_at(later), 10.0);
    }

    #[test]
    fn test_time_until_available() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(100, 10.0, start); // 10 tokens per second
        bucket.try_consume_at(100, start);

        let time = bucket.time_until_available_at(20, start);
        // Should need 2 seconds to get 20 tokens at 10 tokens/sec
        assert!(time.as_secs_f64() >= 1.9 && time.as_secs_f64() <= 2.1);
    }

    #[test]
    fn test_zero_refill_rate_never_recovers() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1, 0.0, start);
        assert!(bucket.try_consume_at(1, start));
        assert_eq!(bucket.time_until_available_at(1, start), Duration::MAX);
    }

    #[test]
    fn test_tiny_refill_rate_saturates_wait() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(1, 1e-20, start);
        assert!(bucket.try_consume_at(1, start));
        assert_eq!(bucket.time_until_available_at(1, start), Duration::MAX);
    }

    proptest! {
        // Draining a bucket of capacity C and waiting t seconds at rate R admits
        // exactly min(C, floor(R * t)) more single-token requests.
        #[test]
        fn prop_refill_admits_min_capacity_and_rate_times_elapsed(
            capacity in 1u32..200,
            rate in 1u32..50,
            wait_ms in 0u64..20_000,
        ) {
            let start = Instant::now();
            let mut bucket = TokenBucket::new_at(capacity, rate as f64, start);
            prop_assert!(bucket.try_consume_at(capacity, start));

            let later = start + Duration::from_millis(wait_ms);
            let mut admitted = 0u64;
            while bucket.try_consume_at(1, later) {
                admitted += 1;
            }

            let refilled = ((rate as u64 * wait_ms) as f64 / 1000.0).floor() as u64;
            let expected = refilled.min(capacity as u64);
            // Floating point refill may land a hair under an integer boundary.
            prop_assert!(admitted <= expected);
            prop_assert!(admitted + 1 >= expected);
        }
    }
}
