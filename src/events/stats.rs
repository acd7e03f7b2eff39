//! Event Statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::BudgetEvent;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStatistics {
    pub total_events: u64,
    pub events_by_type: HashMap<String, u64>,
    pub events_by_severity: HashMap<String, u64>,
    pub events_by_source: HashMap<String, u64>,
    /// Events emitted during the last 60 seconds
    pub events_per_minute: u64,
    pub dropped_events: u64,
    pub handler_errors: u64,
    pub active_subscriptions: usize,
    pub active_routing_rules: usize,
    pub history_size: usize,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Running counters behind [`EventStatistics`]
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    total_events: u64,
    by_type: HashMap<String, u64>,
    by_severity: HashMap<String, u64>,
    by_source: HashMap<String, u64>,
    recent: VecDeque<Instant>,
    last_event_at: Option<DateTime<Utc>>,
}

impl StatsCollector {
    pub fn record(&mut self, event: &BudgetEvent, now: Instant) {
        self.total_events += 1;
        *self.by_type.entry(event.event_type.to_string()).or_insert(0) += 1;
        *self.by_severity.entry(event.severity.to_string()).or_insert(0) += 1;
        *self.by_source.entry(event.source.clone()).or_insert(0) += 1;
        self.recent.push_back(now);
        self.last_event_at = Some(event.timestamp);
        self.prune(now);
    }

    /// Drop rate samples older than a minute
    pub fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.recent.front() {
            if now.saturating_duration_since(*oldest) >= RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    /// Snapshot of the collector-owned fields; the bus fills in the rest
    pub fn snapshot(&mut self, now: Instant) -> EventStatistics {
        self.prune(now);
        EventStatistics {
            total_events: self.total_events,
            events_by_type: self.by_type.clone(),
            events_by_severity: self.by_severity.clone(),
            events_by_source: self.by_source.clone(),
            events_per_minute: self.recent.len() as u64,
            last_event_at: self.last_event_at,
            ..EventStatistics::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, Severity};

    #[test]
    fn test_counts_by_dimension() {
        let mut stats = StatsCollector::default();
        let now = Instant::now();
        stats.record(
            &BudgetEvent::new(EventType::LimitExceeded, "quota_manager", serde_json::Value::Null)
                .with_severity(Severity::Critical),
            now,
        );
        stats.record(&BudgetEvent::new(EventType::UsageUpdated, "quota_manager", serde_json::Value::Null), now);

        let snapshot = stats.snapshot(now);
        assert_eq!(snapshot.total_events, 2);
        assert_eq!(snapshot.events_by_type["limit_exceeded"], 1);
        assert_eq!(snapshot.events_by_severity["critical"], 1);
        assert_eq!(snapshot.events_by_source["quota_manager"], 2);
        assert!(snapshot.last_event_at.is_some());
    }

    #[test]
    fn test_events_per_minute_rolls_off() {
        let mut stats = StatsCollector::default();
        let start = Instant::now();
        let event = BudgetEvent::new(EventType::BudgetReset, "x", serde_json::Value::Null);
        stats.record(&event, start);
        stats.record(&event, start + Duration::from_secs(30));

        assert_eq!(stats.snapshot(start + Duration::from_secs(59)).events_per_minute, 2);
        assert_eq!(stats.snapshot(start + Duration::from_secs(60)).events_per_minute, 1);
        assert_eq!(stats.snapshot(start + Duration::from_secs(91)).events_per_minute, 0);
        assert_eq!(stats.snapshot(start + Duration::from_secs(91)).total_events, 2);
    }
}
