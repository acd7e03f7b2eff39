//! Quota Manager Configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::error::QuotaError;
use super::limit::{default_limits, QuotaLimit};
use super::violation::DEFAULT_MAX_VIOLATIONS;
use crate::rate_limit::RateLimitConfig;
use crate::throttle::ThrottleConfig;

/// Quota manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaManagerConfig {
    /// Limits registered at construction
    pub default_limits: Vec<QuotaLimit>,

    /// Global per-key rate limiter
    pub rate_limit: RateLimitConfig,

    pub throttle: ThrottleConfig,

    /// Turn off violation-triggered throttling after a quiet grace period
    pub enable_auto_adjustment: bool,

    /// Quiet period before auto adjustment releases throttling (ms)
    pub grace_period_ms: u64,

    /// Emit per-action log lines for violations
    pub enable_violation_logging: bool,

    /// Usage percentage at which `threshold_reached` is emitted
    pub warning_threshold_percent: f64,

    /// Violation log capacity
    pub max_violations: usize,

    /// Background maintenance period (ms)
    pub maintenance_interval_ms: u64,
}

impl Default for QuotaManagerConfig {
    fn default() -> Self {
        Self {
            default_limits: default_limits(),
            rate_limit: RateLimitConfig::default(),
            throttle: ThrottleConfig::default(),
            enable_auto_adjustment: false,
            grace_period_ms: 60_000,
            enable_violation_logging: true,
            warning_threshold_percent: 80.0,
            max_violations: DEFAULT_MAX_VIOLATIONS,
            maintenance_interval_ms: 60_000,
        }
    }
}

impl QuotaManagerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), QuotaError> {
        let mut seen = HashSet::new();
        for limit in &self.default_limits {
            limit.validate()?;
            if !seen.insert(limit.id.as_str()) {
                return Err(QuotaError::InvalidConfig(format!("duplicate limit id '{}'", limit.id)));
            }
        }

        self.rate_limit.validate().map_err(QuotaError::InvalidConfig)?;
        self.throttle.validate().map_err(QuotaError::InvalidConfig)?;

        if !(self.warning_threshold_percent > 0.0 && self.warning_threshold_percent <= 100.0) {
            return Err(QuotaError::InvalidConfig(format!(
                "warning_threshold_percent must be within (0, 100], got {}",
                self.warning_threshold_percent
            )));
        }
        if self.max_violations == 0 {
            return Err(QuotaError::InvalidConfig("max_violations must be greater than zero".to_string()));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(QuotaError::InvalidConfig(
                "maintenance_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
