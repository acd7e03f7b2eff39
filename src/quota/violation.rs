//! Quota Violations
//!
//! Violations are immutable once created and kept in a capped log that evicts
//! the oldest entry first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use super::limit::LimitAction;
use super::usage::QuotaUsage;
use crate::types::{RequestType, Severity};

/// Usage percentage above which a violation is critical
pub const CRITICAL_USAGE_PERCENT: f64 = 150.0;

/// Default violation log capacity
pub const DEFAULT_MAX_VIOLATIONS: usize = 1000;

/// Severity for a violation at `usage_percentage`
pub fn violation_severity(usage_percentage: f64) -> Severity {
    if usage_percentage > CRITICAL_USAGE_PERCENT {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// A failed quota check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaViolation {
    /// Unique ID for this violation
    pub id: String,
    pub limit_id: String,
    pub limit_name: String,
    /// Usage at the time of the check, with the rejected value projected in
    pub usage: QuotaUsage,
    pub request_type: RequestType,
    /// Value the rejected request asked for
    pub requested_value: f64,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub action_taken: LimitAction,
}

impl QuotaViolation {
    pub fn new(
        limit_name: String,
        usage: QuotaUsage,
        request_type: RequestType,
        requested_value: f64,
        user_id: Option<String>,
        action_taken: LimitAction,
    ) -> Self {
        Self {
            id: format!("violation-{}", Uuid::new_v4()),
            limit_id: usage.limit_id.clone(),
            limit_name,
            severity: violation_severity(usage.usage_percentage),
            usage,
            request_type,
            requested_value,
            user_id,
            timestamp: Utc::now(),
            action_taken,
        }
    }
}

/// Capped violation log
#[derive(Debug, Clone)]
pub struct ViolationLog {
    /// Map of violation ID to record
    entries: HashMap<String, QuotaViolation>,
    /// IDs, oldest first
    order: VecDeque<String>,
    max_entries: usize,
}

impl ViolationLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Append a violation, evicting the oldest when full
    pub fn push(&mut self, violation: QuotaViolation) {
        while self.order.len() >= self.max_entries {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(violation.id.clone());
        self.entries.insert(violation.id.clone(), violation);
    }

    pub fn get(&self, id: &str) -> Option<&QuotaViolation> {
        self.entries.get(id)
    }

    /// All violations, oldest first
    pub fn list(&self) -> Vec<QuotaViolation> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for ViolationLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_VIOLATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(limit_id: &str, percentage: f64) -> QuotaUsage {
        QuotaUsage {
            limit_id: limit_id.to_string(),
            current_usage: percentage,
            max_value: 100.0,
            usage_percentage: percentage,
            window_start: Utc::now(),
            window_end: Utc::now(),
            is_exceeded: true,
            time_to_reset_ms: 0,
            recent_entries: 0,
        }
    }

    fn violation(limit_id: &str, percentage: f64) -> QuotaViolation {
        QuotaViolation::new(
            limit_id.to_string(),
            usage(limit_id, percentage),
            RequestType::ApiCall,
            1.0,
            None,
            LimitAction::Block,
        )
    }

    #[test]
    fn test_severity_threshold() {
        assert_eq!(violation_severity(150.0), Severity::Warning);
        assert_eq!(violation_severity(101.0), Severity::Warning);
        assert_eq!(violation_severity(150.01), Severity::Critical);
        assert_eq!(violation("a", 400.0).severity, Severity::Critical);
    }

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = ViolationLog::new(2);
        let first = violation("first", 110.0);
        let first_id = first.id.clone();
        log.push(first);
        log.push(violation("second", 110.0));
        log.push(violation("third", 110.0));

        assert_eq!(log.len(), 2);
        assert!(log.get(&first_id).is_none());
        let ids: Vec<String> = log.list().into_iter().map(|v| v.limit_id).collect();
        assert_eq!(ids, vec!["second", "third"]);
    }

    #[test]
    fn test_clear() {
        let mut log = ViolationLog::default();
        log.push(violation("a", 120.0));
        log.clear();
        assert!(log.is_empty());
    }
}
