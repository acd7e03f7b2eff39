//! Shared Types
//!
//! Event and request types exchanged between the quota manager, the event bus
//! and any outside producer of budget events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Event severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Kind of budget event
///
/// Serialized as its snake_case name. Names that are not recognized parse
/// into [`EventType::Custom`], so unrelated producers can publish their own
/// event kinds on the same bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    LimitExceeded,
    UsageUpdated,
    SettingsChanged,
    BudgetReset,
    ThresholdReached,
    ThrottlingChanged,
    Aggregation,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::LimitExceeded => "limit_exceeded",
            EventType::UsageUpdated => "usage_updated",
            EventType::SettingsChanged => "settings_changed",
            EventType::BudgetReset => "budget_reset",
            EventType::ThresholdReached => "threshold_reached",
            EventType::ThrottlingChanged => "throttling_changed",
            EventType::Aggregation => "aggregation",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "limit_exceeded" => EventType::LimitExceeded,
            "usage_updated" => EventType::UsageUpdated,
            "settings_changed" => EventType::SettingsChanged,
            "budget_reset" => EventType::BudgetReset,
            "threshold_reached" => EventType::ThresholdReached,
            "throttling_changed" => EventType::ThrottlingChanged,
            "aggregation" => EventType::Aggregation,
            other => EventType::Custom(other.to_string()),
        })
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        match name.parse::<EventType>() {
            Ok(event_type) => Ok(event_type),
            Err(never) => match never {},
        }
    }
}

/// An immutable budget event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetEvent {
    /// Unique event identifier (UUID v4)
    pub id: String,

    /// Kind of event
    pub event_type: EventType,

    /// When the event was produced (UTC)
    pub timestamp: DateTime<Utc>,

    /// Opaque payload
    pub data: serde_json::Value,

    /// Name of the producing component
    pub source: String,

    /// Event severity
    pub severity: Severity,
}

impl BudgetEvent {
    /// Create an info-severity event stamped with the current time
    pub fn new(event_type: EventType, source: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            timestamp: Utc::now(),
            data,
            source: source.into(),
            severity: Severity::Info,
        }
    }

    /// Set the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Kind of metered operation submitted for admission
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestType {
    ApiCall,
    TokenUsage,
    Cost,
    Other(String),
}

impl RequestType {
    pub fn as_str(&self) -> &str {
        match self {
            RequestType::ApiCall => "api_call",
            RequestType::TokenUsage => "token_usage",
            RequestType::Cost => "cost",
            RequestType::Other(name) => name,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "api_call" => RequestType::ApiCall,
            "token_usage" => RequestType::TokenUsage,
            "cost" => RequestType::Cost,
            other => RequestType::Other(other.to_string()),
        })
    }
}

impl Serialize for RequestType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RequestType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        match name.parse::<RequestType>() {
            Ok(request_type) => Ok(request_type),
            Err(never) => match never {},
        }
    }
}

/// Caller context attached to a metered request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// User issuing the request; `None` means global traffic
    pub user_id: Option<String>,

    /// Session the request belongs to
    pub session_id: Option<String>,

    /// Model or backend being called
    pub model: Option<String>,

    /// Free-form operation name
    pub operation: Option<String>,
}

impl RequestContext {
    /// Context for a specific user
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// The key used for per-user rate limiting
    pub fn subject(&self) -> &str {
        self.user_id.as_deref().unwrap_or("global")
    }
}
