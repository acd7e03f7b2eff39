//! Event Distribution Module
//!
//! Publish/subscribe for budget events with filtering, per-subscription rate
//! limits, priority routing to named targets, per-event aggregation and a
//! bounded history for late subscribers.
//!
//! # Architecture
//!
//! ```text
//!  producer ──emit──▶ EventBus ──┬─▶ stats + history
//!                                ├─▶ routing rules ──▶ Target listeners
//!                                ├─▶ subscriptions (filter, rate limit)
//!                                ├─▶ All / Type listeners
//!                                └─▶ aggregations ──▶ Aggregation listeners
//!
//!  each subscriber: bounded queue ──▶ worker task ──▶ EventHandler
//! ```

pub mod aggregation;
pub mod bus;
pub mod config;
pub mod error;
pub mod filter;
pub mod handler;
pub mod history;
pub mod routing;
pub mod stats;
mod worker;

pub use aggregation::{AggregationConfig, AggregationStrategy, AggregationWindow};
pub use bus::{EmitReport, EventBus, EventSubscription, ListenerChannel};
pub use config::EventBusConfig;
pub use error::EventError;
pub use filter::{EventFilter, SubscriptionRateLimit};
pub use handler::{channel_handler, handler_fn, EventHandler};
pub use history::HistoryQuery;
pub use routing::RoutingRule;
pub use stats::EventStatistics;
