//! Rate Limiting Module
//!
//! Admission primitives that answer "may one more unit pass right now?" for a
//! single logical key, plus a keyed store that holds one limiter per
//! `(request type, user)` pair.
//!
//! # Features
//!
//! - Token bucket with lazy continuous refill
//! - Sliding-window and fixed-window counters
//! - Strategy selection from configuration
//! - Idle limiter cleanup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Limiter Store                          │
//! │            "api_call:alice" → Mutex<RateLimiter>             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────────┐  ┌────────────────┐   │
//! │  │ TokenBucket │  │ SlidingWindow   │  │ FixedWindow    │   │
//! │  └─────────────┘  └─────────────────┘  └────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of the primitives synchronise internally; the store serialises access
//! per key.

pub mod config;
pub mod limiter;
pub mod store;
pub mod token_bucket;
pub mod window;

pub use config::{RateLimitConfig, RateLimitStrategy};
pub use limiter::RateLimiter;
pub use store::{limiter_key, LimiterStore, RateLimitResult};
pub use token_bucket::TokenBucket;
pub use window::{FixedWindowCounter, SlidingWindowCounter};
