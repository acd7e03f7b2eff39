//! Event History
//!
//! Bounded, time-decayed record of retained events, oldest first.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use super::filter::EventFilter;
use crate::types::{BudgetEvent, EventType, Severity};

/// History lookup criteria
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub types: Option<Vec<EventType>>,
    pub severities: Option<Vec<Severity>>,
    pub sources: Option<Vec<String>>,
    /// Inclusive lower bound
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end_time: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    pub fn with_severities(mut self, severities: impl IntoIterator<Item = Severity>) -> Self {
        self.severities = Some(severities.into_iter().collect());
        self
    }

    pub fn with_sources<S: Into<String>>(mut self, sources: impl IntoIterator<Item = S>) -> Self {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn between(mut self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, event: &BudgetEvent) -> bool {
        self.types.as_ref().map_or(true, |t| t.contains(&event.event_type))
            && self.severities.as_ref().map_or(true, |s| s.contains(&event.severity))
            && self.sources.as_ref().map_or(true, |s| s.iter().any(|src| *src == event.source))
            && self.start_time.map_or(true, |start| event.timestamp >= start)
            && self.end_time.map_or(true, |end| event.timestamp <= end)
    }
}

#[derive(Debug)]
pub struct EventHistory {
    events: VecDeque<BudgetEvent>,
    max_size: usize,
    max_age: Duration,
    /// `None` retains every type
    retained_types: Option<HashSet<EventType>>,
}

impl EventHistory {
    pub fn new(max_size: usize, max_age: Duration, retained_types: Option<Vec<EventType>>) -> Self {
        Self {
            events: VecDeque::new(),
            max_size,
            max_age,
            retained_types: retained_types.map(|types| types.into_iter().collect()),
        }
    }

    pub fn retains(&self, event_type: &EventType) -> bool {
        self.retained_types
            .as_ref()
            .map_or(true, |types| types.contains(event_type))
    }

    /// Append if the type is retained; returns whether it was stored
    pub fn push(&mut self, event: BudgetEvent) -> bool {
        if !self.retains(&event.event_type) || self.max_size == 0 {
            return false;
        }
        self.events.push_back(event);
        while self.events.len() > self.max_size {
            self.events.pop_front();
        }
        self.prune_expired(Utc::now());
        true
    }

    /// Drop events older than the max age; returns how many were removed
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let before = self.events.len();
        while let Some(oldest) = self.events.front() {
            if now.signed_duration_since(oldest.timestamp) > max_age {
                self.events.pop_front();
            } else {
                break;
            }
        }
        before - self.events.len()
    }

    /// Matching events, oldest first, truncated to the most recent `limit`
    pub fn query(&self, query: &HistoryQuery) -> Vec<BudgetEvent> {
        let matching: Vec<&BudgetEvent> = self.events.iter().filter(|e| query.matches(e)).collect();
        let skip = match query.limit {
            Some(limit) => matching.len().saturating_sub(limit),
            None => 0,
        };
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Up to `limit` most recent events passing `filter`, oldest first
    pub fn replay(&self, filter: &EventFilter, limit: usize) -> Vec<BudgetEvent> {
        let mut replay: Vec<BudgetEvent> = self
            .events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect();
        replay.reverse();
        replay
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, severity: Severity) -> BudgetEvent {
        BudgetEvent::new(event_type, "test", serde_json::Value::Null).with_severity(severity)
    }

    fn history() -> EventHistory {
        EventHistory::new(100, Duration::from_secs(3600), None)
    }

    #[test]
    fn test_max_size_evicts_oldest() {
        let mut history = EventHistory::new(2, Duration::from_secs(3600), None);
        let first = event(EventType::UsageUpdated, Severity::Info);
        history.push(first.clone());
        history.push(event(EventType::UsageUpdated, Severity::Info));
        history.push(event(EventType::UsageUpdated, Severity::Info));

        assert_eq!(history.len(), 2);
        assert!(history.query(&HistoryQuery::new()).iter().all(|e| e.id != first.id));
    }

    #[test]
    fn test_retained_types() {
        let mut history = EventHistory::new(10, Duration::from_secs(3600), Some(vec![EventType::LimitExceeded]));
        assert!(!history.push(event(EventType::UsageUpdated, Severity::Info)));
        assert!(history.push(event(EventType::LimitExceeded, Severity::Warning)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_prune_by_age() {
        let mut history = history();
        let mut old = event(EventType::BudgetReset, Severity::Info);
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        history.events.push_back(old);
        history.events.push_back(event(EventType::BudgetReset, Severity::Info));

        assert_eq!(history.prune_expired(Utc::now()), 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_query_filters_and_limit() {
        let mut history = history();
        for _ in 0..3 {
            history.push(event(EventType::LimitExceeded, Severity::Critical));
            history.push(event(EventType::UsageUpdated, Severity::Info));
        }
        let last = event(EventType::LimitExceeded, Severity::Warning);
        history.push(last.clone());

        let all_limits = history.query(&HistoryQuery::new().with_types([EventType::LimitExceeded]));
        assert_eq!(all_limits.len(), 4);

        let recent = history.query(&HistoryQuery::new().with_types([EventType::LimitExceeded]).with_limit(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].id, last.id);

        let critical = history.query(&HistoryQuery::new().with_severities([Severity::Critical]));
        assert_eq!(critical.len(), 3);

        let none = history.query(&HistoryQuery::new().between(
            Utc::now() + chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(2),
        ));
        assert!(none.is_empty());
    }

    #[test]
    fn test_replay_most_recent_in_order() {
        let mut history = history();
        let events: Vec<BudgetEvent> = (0..5).map(|_| event(EventType::SettingsChanged, Severity::Info)).collect();
        for e in &events {
            history.push(e.clone());
        }

        let replay = history.replay(&EventFilter::new(), 3);
        let ids: Vec<&str> = replay.iter().map(|e| e.id.as_str()).collect();
        let expected: Vec<&str> = events[2..].iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, expected);
    }
}
