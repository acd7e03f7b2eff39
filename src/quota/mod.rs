//! Quota Management Module
//!
//! Usage limits over fixed or sliding windows, layered on top of the per-key
//! rate limiter and the global throttle.

pub mod config;
pub mod error;
pub mod limit;
pub mod manager;
pub mod result;
pub mod usage;
pub mod violation;

pub use config::QuotaManagerConfig;
pub use error::QuotaError;
pub use limit::{default_limits, LimitAction, LimitType, QuotaLimit, ResetBehavior};
pub use manager::{QuotaManager, ThrottleStatus};
pub use result::{CheckResult, Decision, RejectReason};
pub use usage::{QuotaUsage, UsageWindow};
pub use violation::{QuotaViolation, ViolationLog};
