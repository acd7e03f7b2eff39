//! Event Bus Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::EventError;
use crate::types::EventType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Maximum retained events
    pub max_history_size: usize,

    /// Retained events older than this are pruned (ms)
    pub max_history_age_ms: u64,

    /// Event types kept in history; `None` keeps all
    pub retained_types: Option<Vec<EventType>>,

    /// Events replayed to a new subscription that asks for history
    pub replay_limit: usize,

    /// Bounded queue size per subscriber
    pub subscriber_queue_capacity: usize,

    /// Per-call handler timeout (ms)
    pub handler_timeout_ms: u64,

    /// Background maintenance period (ms)
    pub maintenance_interval_ms: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_history_size: 1000,
            max_history_age_ms: 24 * 60 * 60 * 1000,
            retained_types: None,
            replay_limit: 100,
            subscriber_queue_capacity: 256,
            handler_timeout_ms: 5000,
            maintenance_interval_ms: 60_000,
        }
    }
}

impl EventBusConfig {
    pub fn max_history_age(&self) -> Duration {
        Duration::from_millis(self.max_history_age_ms)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.subscriber_queue_capacity == 0 {
            return Err(EventError::InvalidConfig(
                "subscriber_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.handler_timeout_ms == 0 {
            return Err(EventError::InvalidConfig("handler_timeout_ms must be greater than zero".to_string()));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(EventError::InvalidConfig(
                "maintenance_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
