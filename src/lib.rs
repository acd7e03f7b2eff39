//! BudgetGuard Library
//!
//! Real-time usage governance for metered operations: per-key rate limiting,
//! windowed quotas with violation tracking, probabilistic throttling with
//! backoff, and an in-process bus distributing budget events to subscribers.

pub mod config;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod quota;
pub mod rate_limit;
pub mod throttle;
pub mod types;

pub use events::EventBus;
pub use quota::{CheckResult, QuotaManager};
pub use types::{BudgetEvent, EventType, RequestContext, RequestType, Severity};
