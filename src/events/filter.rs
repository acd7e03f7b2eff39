//! Event Filters
//!
//! Shared by subscriptions and routing rules. Each populated criterion must
//! match; an unset criterion matches everything.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::error::EventError;
use crate::types::{BudgetEvent, EventType, Severity};

/// Custom match predicate
pub type EventPredicate = Arc<dyn Fn(&BudgetEvent) -> bool + Send + Sync>;

/// Per-subscription delivery budget: at most `max_events` per fixed window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionRateLimit {
    pub max_events: u32,
    pub window_ms: u64,
}

impl SubscriptionRateLimit {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Clone, Default)]
pub struct EventFilter {
    pub types: Option<Vec<EventType>>,
    pub severities: Option<Vec<Severity>>,
    pub sources: Option<Vec<String>>,
    pub predicate: Option<EventPredicate>,
    /// Only meaningful on subscriptions
    pub rate_limit: Option<SubscriptionRateLimit>,
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFilter")
            .field("types", &self.types)
            .field("severities", &self.severities)
            .field("sources", &self.sources)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

impl EventFilter {
    /// Filter that matches every event
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

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BudgetEvent) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_rate_limit(mut self, max_events: u32, window: Duration) -> Self {
        self.rate_limit = Some(SubscriptionRateLimit::new(max_events, window));
        self
    }

    /// Check whether `event` passes the type, severity, source and predicate criteria
    pub fn matches(&self, event: &BudgetEvent) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(severities) = &self.severities {
            if !severities.contains(&event.severity) {
                return false;
            }
        }
        if let Some(sources) = &self.sources {
            if !sources.iter().any(|source| *source == event.source) {
                return false;
            }
        }
        match &self.predicate {
            Some(predicate) => predicate(event),
            None => true,
        }
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.types.as_ref().is_some_and(|t| t.is_empty()) {
            return Err(EventError::InvalidFilter("types list is empty".to_string()));
        }
        if self.severities.as_ref().is_some_and(|s| s.is_empty()) {
            return Err(EventError::InvalidFilter("severities list is empty".to_string()));
        }
        if self.sources.as_ref().is_some_and(|s| s.is_empty()) {
            return Err(EventError::InvalidFilter("sources list is empty".to_string()));
        }
        if let Some(limit) = &self.rate_limit {
            if limit.max_events == 0 || limit.window_ms == 0 {
                return Err(EventError::InvalidFilter(
                    "rate limit needs max_events > 0 and window_ms > 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}
