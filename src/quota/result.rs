//! Admission Results

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::limit::LimitAction;

/// Why a request was turned away
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// The per-key rate limiter had no capacity
    RateLimited { key: String },
    /// A quota limit would be exceeded
    QuotaExceeded { limit_id: String, action: LimitAction },
    /// Lost the throttle draw
    Throttled,
}

/// Admission decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Rejected { reason: RejectReason },
    /// Evaluation itself failed; the request is let through
    FailedOpen { error: String },
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub decision: Decision,

    /// Usage of the most relevant limit (before this request)
    pub current_usage: f64,

    /// Ceiling of the most relevant limit
    pub limit: f64,

    pub usage_percentage: f64,

    pub message: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,

    /// When the caller may retry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,

    /// Backoff hint from the throttle controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle_delay: Option<Duration>,
}

impl CheckResult {
    /// Create an allowed result
    pub fn allow(current_usage: f64, limit: f64, usage_percentage: f64) -> Self {
        Self {
            decision: Decision::Allowed,
            current_usage,
            limit,
            usage_percentage,
            message: "Request allowed".to_string(),
            recommendations: Vec::new(),
            retry_after: None,
            throttle_delay: None,
        }
    }

    /// Create a rejected result
    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            decision: Decision::Rejected { reason },
            current_usage: 0.0,
            limit: 0.0,
            usage_percentage: 0.0,
            message: message.into(),
            recommendations: Vec::new(),
            retry_after: None,
            throttle_delay: None,
        }
    }

    /// Create a fail-open result
    pub fn failed_open(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            message: format!("Quota check degraded, request allowed: {}", error),
            decision: Decision::FailedOpen { error },
            current_usage: 0.0,
            limit: 0.0,
            usage_percentage: 0.0,
            recommendations: Vec::new(),
            retry_after: None,
            throttle_delay: None,
        }
    }

    pub fn with_usage(mut self, current_usage: f64, limit: f64, usage_percentage: f64) -> Self {
        self.current_usage = current_usage;
        self.limit = limit;
        self.usage_percentage = usage_percentage;
        self
    }

    pub fn with_recommendations(mut self, recommendations: Vec<String>) -> Self {
        self.recommendations = recommendations;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay = Some(delay);
        self
    }

    /// Whether the caller may proceed (true for a fail-open pass)
    pub fn allowed(&self) -> bool {
        matches!(self.decision, Decision::Allowed | Decision::FailedOpen { .. })
    }

    pub fn is_failed_open(&self) -> bool {
        matches!(self.decision, Decision::FailedOpen { .. })
    }

    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match &self.decision {
            Decision::Rejected { reason } => Some(reason),
            _ => None,
        }
    }

    /// Short label for metrics
    pub fn decision_label(&self) -> &'static str {
        match &self.decision {
            Decision::Allowed => "allowed",
            Decision::Rejected {
                reason: RejectReason::RateLimited { .. },
            } => "rate_limited",
            Decision::Rejected {
                reason: RejectReason::QuotaExceeded { .. },
            } => "quota_exceeded",
            Decision::Rejected {
                reason: RejectReason::Throttled,
            } => "throttled",
            Decision::FailedOpen { .. } => "failed_open",
        }
    }
}
