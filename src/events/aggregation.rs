//! Aggregations
//!
//! Each qualifying event produces one aggregation window covering that single
//! event. Windows span `[event time - window_ms, event time]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use super::error::EventError;
use crate::types::{BudgetEvent, EventType};

/// Longest accepted aggregation window (one year)
pub const MAX_AGGREGATION_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationStrategy::Count => write!(f, "count"),
            AggregationStrategy::Sum => write!(f, "sum"),
            AggregationStrategy::Average => write!(f, "average"),
            AggregationStrategy::Min => write!(f, "min"),
            AggregationStrategy::Max => write!(f, "max"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub id: String,
    pub window_ms: u64,
    pub strategy: AggregationStrategy,
    /// Only these event types qualify; `None` means all
    #[serde(default)]
    pub types: Option<Vec<EventType>>,
    /// Dotted path to a numeric value in the event data
    #[serde(default)]
    pub field: Option<String>,
}

impl AggregationConfig {
    pub fn new(id: impl Into<String>, window: Duration, strategy: AggregationStrategy) -> Self {
        Self {
            id: id.into(),
            window_ms: window.as_millis() as u64,
            strategy,
            types: None,
            field: None,
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.types = Some(types.into_iter().collect());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.window_ms == 0 || self.window_ms > MAX_AGGREGATION_WINDOW_MS {
            return Err(EventError::InvalidConfig(format!(
                "aggregation '{}' needs 0 < window_ms <= {}, got {}",
                self.id, MAX_AGGREGATION_WINDOW_MS, self.window_ms
            )));
        }
        Ok(())
    }

    fn qualifies(&self, event: &BudgetEvent) -> bool {
        match &self.types {
            Some(types) => types.contains(&event.event_type),
            None => true,
        }
    }

    /// Aggregate a single event
    ///
    /// Returns `None` when the event does not qualify, or when a value-based
    /// strategy finds no numeric value at `field`.
    pub fn aggregate(&self, event: &BudgetEvent) -> Option<AggregationWindow> {
        // Aggregation notifications never feed back into aggregations
        if event.event_type == EventType::Aggregation || !self.qualifies(event) {
            return None;
        }

        let aggregated_value = match self.strategy {
            AggregationStrategy::Count => 1.0,
            _ => {
                let field = self.field.as_deref()?;
                match extract_number(&event.data, field) {
                    Some(value) => value,
                    None => {
                        debug!(aggregation = %self.id, field, event_id = %event.id, "No numeric value to aggregate");
                        return None;
                    }
                }
            }
        };

        // Clamp to the earliest representable time rather than overflow
        let window_start = i64::try_from(self.window_ms)
            .ok()
            .and_then(chrono::TimeDelta::try_milliseconds)
            .and_then(|window| event.timestamp.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Some(AggregationWindow {
            aggregation_id: self.id.clone(),
            window_start,
            window_end: event.timestamp,
            event_type: event.event_type.clone(),
            event_count: 1,
            aggregated_value,
            strategy: self.strategy,
        })
    }
}

/// Walk a dotted path (`usage.cost`) to a number
pub fn extract_number(data: &serde_json::Value, path: &str) -> Option<f64> {
    path.split('.')
        .try_fold(data, |value, key| value.get(key))
        .and_then(|value| value.as_f64())
}

/// Shape of one aggregation notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationWindow {
    pub aggregation_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub event_type: EventType,
    pub event_count: u64,
    pub aggregated_value: f64,
    pub strategy: AggregationStrategy,
}
