//! Event Bus Error Types

/// Error types for event bus operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Subscription already exists: {0}")]
    DuplicateSubscription(String),

    #[error("Subscription not found: {0}")]
    UnknownSubscription(String),

    #[error("Listener not found: {0}")]
    UnknownListener(String),

    #[error("Routing rule already exists: {0}")]
    DuplicateRule(String),

    #[error("Routing rule not found: {0}")]
    UnknownRule(String),

    #[error("Aggregation already exists: {0}")]
    DuplicateAggregation(String),

    #[error("Aggregation not found: {0}")]
    UnknownAggregation(String),

    /// Filter that could never match or has a broken rate limit
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
