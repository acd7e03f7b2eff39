//! Event Bus
//!
//! In-process publish/subscribe for budget events.
//!
//! `emit_budget_event` runs on the producer's task and never waits on a
//! handler: it updates statistics and history, fans the event out to routing
//! targets, subscriptions and listeners by `try_send`ing into each one's
//! bounded queue, and finally produces aggregation notifications. Anything
//! that does not fit (subscription rate limit spent, queue full) is dropped
//! and counted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::aggregation::AggregationConfig;
use super::config::EventBusConfig;
use super::error::EventError;
use super::filter::{EventFilter, SubscriptionRateLimit};
use super::handler::EventHandler;
use super::history::{EventHistory, HistoryQuery};
use super::routing::{RoutingRule, RoutingTable};
use super::stats::{EventStatistics, StatsCollector};
use super::worker::{DeliveryCounters, DeliveryWorker};
use crate::types::{BudgetEvent, EventType};

/// Source name on aggregation notifications
pub const AGGREGATION_SOURCE: &str = "event_bus";

/// Subscription request
pub struct EventSubscription {
    pub id: String,
    pub filter: EventFilter,
    pub handler: Arc<dyn EventHandler>,
    /// Replay retained history before live events
    pub include_history: bool,
    /// Inactive subscriptions stay registered but receive nothing
    pub active: bool,
}

impl EventSubscription {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            id: format!("sub-{}", uuid::Uuid::new_v4()),
            filter: EventFilter::default(),
            handler,
            include_history: false,
            active: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_history(mut self) -> Self {
        self.include_history = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// What a generic listener hears
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerChannel {
    /// Every emitted event
    All,
    /// Emitted events of one type
    Type(EventType),
    /// Events a routing rule sends to this target name
    Target(String),
    /// Aggregation notifications
    Aggregation,
}

/// Outcome of one emit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Target names in fan-out order
    pub routed_targets: Vec<String>,
    /// Queues that accepted the event
    pub delivered: usize,
    /// Deliveries dropped by rate limits or full queues
    pub dropped: usize,
    /// Aggregation notifications produced
    pub aggregations: usize,
}

#[derive(Debug)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

struct Subscription {
    active: AtomicBool,
    filter: EventFilter,
    worker: DeliveryWorker,
    rate_window: Mutex<Option<RateWindow>>,
}

impl Subscription {
    /// Charge one delivery against the rate limit; false when the window is spent
    async fn admit(&self, limit: &SubscriptionRateLimit, now: Instant) -> bool {
        let mut window = self.rate_window.lock().await;
        match window.as_mut() {
            Some(w) if now <= w.reset_at => {
                if w.count < limit.max_events {
                    w.count += 1;
                    true
                } else {
                    false
                }
            }
            _ => {
                *window = Some(RateWindow {
                    count: 1,
                    reset_at: now + limit.window(),
                });
                true
            }
        }
    }
}

struct Listener {
    id: String,
    channel: ListenerChannel,
    worker: DeliveryWorker,
}

/// Event bus
#[derive(Clone)]
pub struct EventBus {
    config: Arc<EventBusConfig>,
    /// Subscriptions in registration order
    subscriptions: Arc<RwLock<Vec<(String, Arc<Subscription>)>>>,
    listeners: Arc<RwLock<Vec<Listener>>>,
    routing: Arc<RwLock<RoutingTable>>,
    aggregations: Arc<RwLock<Vec<AggregationConfig>>>,
    history: Arc<RwLock<EventHistory>>,
    stats: Arc<RwLock<StatsCollector>>,
    counters: Arc<DeliveryCounters>,
    maintenance_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Result<Self, EventError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EventBusConfig) -> Self {
        let history = EventHistory::new(
            config.max_history_size,
            config.max_history_age(),
            config.retained_types.clone(),
        );

        Self {
            config: Arc::new(config),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            listeners: Arc::new(RwLock::new(Vec::new())),
            routing: Arc::new(RwLock::new(RoutingTable::default())),
            aggregations: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(history)),
            stats: Arc::new(RwLock::new(StatsCollector::default())),
            counters: Arc::new(DeliveryCounters::default()),
            maintenance_task: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    fn spawn_worker(&self, name: String, handler: Arc<dyn EventHandler>) -> DeliveryWorker {
        DeliveryWorker::spawn(
            name,
            handler,
            self.config.subscriber_queue_capacity,
            self.config.handler_timeout(),
            self.counters.clone(),
        )
    }

    /// Publish an event
    pub async fn emit_budget_event(&self, event: BudgetEvent) -> EmitReport {
        let now = Instant::now();
        let mut report = EmitReport::default();

        self.stats.write().await.record(&event, now);
        crate::metrics::BUS_EVENTS_TOTAL
            .with_label_values(&[event.event_type.as_str()])
            .inc();

        self.history.write().await.push(event.clone());

        let listeners = self.listeners.read().await;

        // Routing fan-out, highest priority first
        let targets = self.routing.read().await.targets_for(&event);
        for target in targets {
            let mut reached = false;
            for listener in listeners
                .iter()
                .filter(|l| matches!(&l.channel, ListenerChannel::Target(name) if *name == target))
            {
                reached = true;
                self.deliver(&listener.worker, event.clone(), &mut report);
            }
            if !reached {
                debug!(routing_target = %target, event_id = %event.id, "No listener for routing target");
            }
            report.routed_targets.push(target);
        }

        // Subscriptions
        {
            let subscriptions = self.subscriptions.read().await;
            for (id, subscription) in subscriptions.iter() {
                let active = subscription.active.load(Ordering::Relaxed);
                if !active || !subscription.filter.matches(&event) {
                    continue;
                }
                if let Some(limit) = &subscription.filter.rate_limit {
                    if !subscription.admit(limit, now).await {
                        debug!(subscription = %id, event_id = %event.id, "Subscription rate limit reached");
                        self.counters.record_drop();
                        report.dropped += 1;
                        continue;
                    }
                }
                self.deliver(&subscription.worker, event.clone(), &mut report);
            }
        }

        // Generic listeners
        for listener in listeners.iter() {
            let hears = match &listener.channel {
                ListenerChannel::All => true,
                ListenerChannel::Type(event_type) => *event_type == event.event_type,
                _ => false,
            };
            if hears {
                self.deliver(&listener.worker, event.clone(), &mut report);
            }
        }

        // Aggregations
        let windows: Vec<_> = self
            .aggregations
            .read()
            .await
            .iter()
            .filter_map(|config| config.aggregate(&event))
            .collect();
        for window in windows {
            let data = serde_json::to_value(&window).unwrap_or_default();
            let notification =
                BudgetEvent::new(EventType::Aggregation, AGGREGATION_SOURCE, data).with_severity(event.severity);
            for listener in listeners
                .iter()
                .filter(|l| l.channel == ListenerChannel::Aggregation)
            {
                self.deliver(&listener.worker, notification.clone(), &mut report);
            }
            report.aggregations += 1;
        }

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            delivered = report.delivered,
            dropped = report.dropped,
            "Event emitted"
        );
        report
    }

    fn deliver(&self, worker: &DeliveryWorker, event: BudgetEvent, report: &mut EmitReport) {
        if worker.try_deliver(event) {
            report.delivered += 1;
        } else {
            self.counters.record_drop();
            report.dropped += 1;
        }
    }

    /// Register a subscription; returns its id
    ///
    /// With `include_history`, up to `replay_limit` matching retained events
    /// are queued before the subscription can see live events. Replay is not
    /// charged to the subscription's rate limit.
    pub async fn subscribe(&self, subscription: EventSubscription) -> Result<String, EventError> {
        subscription.filter.validate()?;

        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.iter().any(|(id, _)| *id == subscription.id) {
            return Err(EventError::DuplicateSubscription(subscription.id));
        }

        let worker = self.spawn_worker(subscription.id.clone(), subscription.handler);
        if subscription.include_history {
            let replay = self
                .history
                .read()
                .await
                .replay(&subscription.filter, self.config.replay_limit);
            let replayed = replay.len();
            for event in replay {
                if !worker.try_deliver(event) {
                    self.counters.record_drop();
                }
            }
            debug!(subscription = %subscription.id, replayed, "Replayed event history");
        }

        let id = subscription.id;
        subscriptions.push((
            id.clone(),
            Arc::new(Subscription {
                active: AtomicBool::new(subscription.active),
                filter: subscription.filter,
                worker,
                rate_window: Mutex::new(None),
            }),
        ));
        info!(subscription = %id, "Subscription added");
        Ok(id)
    }

    /// Remove a subscription; events already queued are still delivered
    pub async fn unsubscribe(&self, id: &str) -> Result<(), EventError> {
        let mut subscriptions = self.subscriptions.write().await;
        let index = subscriptions
            .iter()
            .position(|(sub_id, _)| sub_id == id)
            .ok_or_else(|| EventError::UnknownSubscription(id.to_string()))?;
        subscriptions.remove(index);
        info!(subscription = %id, "Subscription removed");
        Ok(())
    }

    /// Pause or resume live delivery to a subscription
    pub async fn set_subscription_active(&self, id: &str, active: bool) -> Result<(), EventError> {
        let subscriptions = self.subscriptions.read().await;
        let (_, subscription) = subscriptions
            .iter()
            .find(|(sub_id, _)| sub_id == id)
            .ok_or_else(|| EventError::UnknownSubscription(id.to_string()))?;
        subscription.active.store(active, Ordering::Relaxed);
        info!(subscription = %id, active, "Subscription state changed");
        Ok(())
    }

    /// Register a generic listener; returns its id
    pub async fn on(&self, channel: ListenerChannel, handler: Arc<dyn EventHandler>) -> String {
        let id = format!("listener-{}", uuid::Uuid::new_v4());
        let worker = self.spawn_worker(id.clone(), handler);
        debug!(listener = %id, channel = ?channel, "Listener added");
        self.listeners.write().await.push(Listener {
            id: id.clone(),
            channel,
            worker,
        });
        id
    }

    pub async fn off(&self, id: &str) -> Result<(), EventError> {
        let mut listeners = self.listeners.write().await;
        let index = listeners
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| EventError::UnknownListener(id.to_string()))?;
        listeners.remove(index);
        Ok(())
    }

    pub async fn add_routing_rule(&self, rule: RoutingRule) -> Result<(), EventError> {
        let id = rule.id.clone();
        self.routing.write().await.add(rule)?;
        info!(rule = %id, "Routing rule added");
        Ok(())
    }

    pub async fn remove_routing_rule(&self, id: &str) -> Result<RoutingRule, EventError> {
        let rule = self.routing.write().await.remove(id)?;
        info!(rule = %id, "Routing rule removed");
        Ok(rule)
    }

    pub async fn add_aggregation(&self, config: AggregationConfig) -> Result<(), EventError> {
        let mut aggregations = self.aggregations.write().await;
        if aggregations.iter().any(|a| a.id == config.id) {
            return Err(EventError::DuplicateAggregation(config.id));
        }
        config.validate()?;
        info!(aggregation = %config.id, strategy = %config.strategy, "Aggregation added");
        aggregations.push(config);
        Ok(())
    }

    pub async fn remove_aggregation(&self, id: &str) -> Result<AggregationConfig, EventError> {
        let mut aggregations = self.aggregations.write().await;
        let index = aggregations
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| EventError::UnknownAggregation(id.to_string()))?;
        Ok(aggregations.remove(index))
    }

    /// Snapshot of retained history; never mutates it
    pub async fn get_event_history(&self, query: &HistoryQuery) -> Vec<BudgetEvent> {
        self.history.read().await.query(query)
    }

    pub async fn get_statistics(&self) -> EventStatistics {
        let mut stats = self.stats.write().await.snapshot(Instant::now());
        stats.dropped_events = self.counters.dropped();
        stats.handler_errors = self.counters.handler_errors();
        stats.active_subscriptions = self
            .subscriptions
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.active.load(Ordering::Relaxed))
            .count();
        stats.active_routing_rules = self.routing.read().await.active_count();
        stats.history_size = self.history.read().await.len();
        stats
    }

    pub async fn reset_statistics(&self) {
        self.stats.write().await.reset();
        self.counters.reset();
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
        info!("Event history cleared");
    }

    /// Prune history by age, roll the per-minute window and drop expired
    /// subscription rate windows
    pub async fn run_maintenance(&self) {
        let now = Instant::now();
        let pruned = self.history.write().await.prune_expired(chrono::Utc::now());
        self.stats.write().await.prune(now);

        let subscriptions: Vec<Arc<Subscription>> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|(_, s)| s.clone())
            .collect();
        for subscription in subscriptions {
            let mut window = subscription.rate_window.lock().await;
            if window.as_ref().is_some_and(|w| now > w.reset_at) {
                *window = None;
            }
        }

        if pruned > 0 {
            debug!(pruned, "Pruned expired event history");
        }
    }

    /// Start periodic maintenance; a running task is replaced
    pub async fn start_maintenance(&self) {
        let bus = self.clone();
        let period = self.config.maintenance_interval();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                bus.run_maintenance().await;
            }
        });

        if let Some(previous) = self.maintenance_task.write().await.replace(task) {
            previous.abort();
        }
        info!(interval_ms = period.as_millis() as u64, "Event bus maintenance started");
    }

    /// Stop maintenance and release every subscription and listener
    pub async fn shutdown(&self) {
        if let Some(task) = self.maintenance_task.write().await.take() {
            task.abort();
        }

        for (_, subscription) in self.subscriptions.write().await.drain(..) {
            subscription.worker.abort();
        }
        for listener in self.listeners.write().await.drain(..) {
            listener.worker.abort();
        }
        info!("Event bus shut down");
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::build(EventBusConfig::default())
    }
}
