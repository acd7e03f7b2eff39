//! Quota Limits
//!
//! Static limit definitions: what is metered, the ceiling, the window and what
//! happens when it is crossed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::error::QuotaError;
use crate::types::RequestType;

/// What a limit meters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Requests,
    Tokens,
    Cost,
    /// Applies to every request type
    Custom,
}

impl LimitType {
    /// Whether a request of `request_type` counts against this kind of limit
    pub fn applies_to(&self, request_type: &RequestType) -> bool {
        match self {
            LimitType::Requests => *request_type == RequestType::ApiCall,
            LimitType::Tokens => *request_type == RequestType::TokenUsage,
            LimitType::Cost => *request_type == RequestType::Cost,
            LimitType::Custom => true,
        }
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitType::Requests => write!(f, "requests"),
            LimitType::Tokens => write!(f, "tokens"),
            LimitType::Cost => write!(f, "cost"),
            LimitType::Custom => write!(f, "custom"),
        }
    }
}

/// How the usage window moves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetBehavior {
    /// Trailing window ending now
    #[default]
    Sliding,
    /// Window that restarts after it ends
    Fixed,
}

impl fmt::Display for ResetBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetBehavior::Sliding => write!(f, "sliding"),
            ResetBehavior::Fixed => write!(f, "fixed"),
        }
    }
}

/// Side effect taken when a limit is exceeded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitAction {
    #[default]
    Block,
    Throttle,
    Warn,
    Log,
}

impl fmt::Display for LimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitAction::Block => write!(f, "block"),
            LimitAction::Throttle => write!(f, "throttle"),
            LimitAction::Warn => write!(f, "warn"),
            LimitAction::Log => write!(f, "log"),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// A named ceiling on accumulated usage over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimit {
    /// Unique key
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(rename = "type")]
    pub limit_type: LimitType,

    /// Numeric ceiling
    pub max_value: f64,

    /// Window length in milliseconds
    pub window_ms: u64,

    #[serde(default)]
    pub reset_behavior: ResetBehavior,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Evaluation importance, reported only
    #[serde(default)]
    pub priority: u32,

    #[serde(default)]
    pub action: LimitAction,
}

impl QuotaLimit {
    /// Create an enabled sliding limit that blocks when exceeded
    pub fn new(id: impl Into<String>, limit_type: LimitType, max_value: f64, window: Duration) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            limit_type,
            max_value,
            window_ms: window.as_millis() as u64,
            reset_behavior: ResetBehavior::Sliding,
            enabled: true,
            priority: 0,
            action: LimitAction::Block,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_reset_behavior(mut self, reset_behavior: ResetBehavior) -> Self {
        self.reset_behavior = reset_behavior;
        self
    }

    pub fn with_action(mut self, action: LimitAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Whether `request_type` counts against this limit
    pub fn is_applicable(&self, request_type: &RequestType) -> bool {
        self.limit_type.applies_to(request_type)
    }

    /// Reject malformed definitions at registration time
    pub fn validate(&self) -> Result<(), QuotaError> {
        if self.id.trim().is_empty() {
            return Err(QuotaError::InvalidLimit(self.id.clone(), "id must not be empty".to_string()));
        }
        if !self.max_value.is_finite() || self.max_value <= 0.0 {
            return Err(QuotaError::InvalidLimit(
                self.id.clone(),
                format!("max_value must be a positive number, got {}", self.max_value),
            ));
        }
        if self.window_ms == 0 {
            return Err(QuotaError::InvalidLimit(
                self.id.clone(),
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Limits installed when no configuration supplies any
pub fn default_limits() -> Vec<QuotaLimit> {
    vec![
        QuotaLimit::new("daily_requests", LimitType::Requests, 1000.0, Duration::from_secs(24 * 3600))
            .with_name("Daily API Requests")
            .with_reset_behavior(ResetBehavior::Fixed)
            .with_action(LimitAction::Block)
            .with_priority(1),
        QuotaLimit::new("hourly_cost", LimitType::Cost, 10.0, Duration::from_secs(3600))
            .with_name("Hourly Cost Limit")
            .with_reset_behavior(ResetBehavior::Sliding)
            .with_action(LimitAction::Warn)
            .with_priority(2),
    ]
}
