//! Quota Manager
//!
//! Admission control for metered operations. A check runs, in order:
//!
//! 1. the per-key rate limiter (`"<request_type>:<user|global>"`); a rejection
//!    here has no side effects,
//! 2. every enabled limit applicable to the request type, in registration
//!    order; the first one that would be exceeded rejects and is recorded as a
//!    violation,
//! 3. the global throttle, when active.
//!
//! Checking and recording are separate calls. Two callers can both pass a
//! check before either records, so the limit can be overshot by in-flight
//! requests. `check_and_record` closes that gap for callers that route all of
//! their traffic through it.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::QuotaManagerConfig;
use super::error::QuotaError;
use super::limit::{LimitAction, QuotaLimit};
use super::result::{CheckResult, RejectReason};
use super::usage::{usage_percentage, QuotaUsage, UsageWindow};
use super::violation::{QuotaViolation, ViolationLog};
use crate::events::EventBus;
use crate::metrics;
use crate::rate_limit::{limiter_key, LimiterStore, RateLimitConfig};
use crate::throttle::{ThrottleConfig, ThrottleController};
use crate::types::{BudgetEvent, EventType, RequestContext, RequestType, Severity};

/// Source name on events produced by the manager
pub const EVENT_SOURCE: &str = "quota_manager";

#[derive(Debug, Clone)]
struct LimitEntry {
    limit: QuotaLimit,
    usage: Arc<Mutex<UsageWindow>>,
}

impl LimitEntry {
    fn new(limit: QuotaLimit, now: Instant) -> Self {
        let usage = UsageWindow::new(&limit, now);
        Self {
            limit,
            usage: Arc::new(Mutex::new(usage)),
        }
    }
}

#[derive(Debug)]
struct ThrottleState {
    controller: ThrottleController,
    /// Enabled by a throttle-action violation rather than by hand
    auto_enabled: bool,
    last_violation: Option<Instant>,
}

/// Throttle status snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThrottleStatus {
    pub enabled: bool,
    pub current_delay_ms: u64,
    pub config: ThrottleConfig,
}

impl From<&ThrottleController> for ThrottleStatus {
    fn from(controller: &ThrottleController) -> Self {
        Self {
            enabled: controller.is_enabled(),
            current_delay_ms: controller.current_delay().as_millis() as u64,
            config: controller.config().clone(),
        }
    }
}

/// Quota manager
#[derive(Clone)]
pub struct QuotaManager {
    config: Arc<QuotaManagerConfig>,

    /// Limits in registration order
    limits: Arc<RwLock<Vec<LimitEntry>>>,

    rate_limiter: LimiterStore,

    throttle: Arc<Mutex<ThrottleState>>,

    violations: Arc<RwLock<ViolationLog>>,

    /// Serialises `check_and_record`
    admission: Arc<Mutex<()>>,

    event_bus: Option<EventBus>,

    maintenance_task: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl QuotaManager {
    /// Create a manager with the configured limits registered
    pub fn new(config: QuotaManagerConfig) -> Result<Self, QuotaError> {
        config.validate()?;

        let now = Instant::now();
        let limits = config
            .default_limits
            .iter()
            .cloned()
            .map(|limit| LimitEntry::new(limit, now))
            .collect();

        Ok(Self {
            limits: Arc::new(RwLock::new(limits)),
            rate_limiter: LimiterStore::new(config.rate_limit.clone()),
            throttle: Arc::new(Mutex::new(ThrottleState {
                controller: ThrottleController::new(config.throttle.clone()),
                auto_enabled: false,
                last_violation: None,
            })),
            violations: Arc::new(RwLock::new(ViolationLog::new(config.max_violations))),
            admission: Arc::new(Mutex::new(())),
            event_bus: None,
            maintenance_task: Arc::new(RwLock::new(None)),
            config: Arc::new(config),
        })
    }

    /// Publish manager events on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn config(&self) -> &QuotaManagerConfig {
        &self.config
    }

    async fn emit(&self, event_type: EventType, severity: Severity, data: serde_json::Value) {
        if let Some(bus) = &self.event_bus {
            let event = BudgetEvent::new(event_type, EVENT_SOURCE, data).with_severity(severity);
            bus.emit_budget_event(event).await;
        }
    }

    /// Decide whether a request may proceed
    ///
    /// Never fails: an evaluation error yields a fail-open result.
    pub async fn check_request_allowed(
        &self,
        request_type: &RequestType,
        value: f64,
        context: &RequestContext,
    ) -> CheckResult {
        let started = Instant::now();

        let result = match self.evaluate(request_type, value, context, started).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    request_type = %request_type,
                    value,
                    error = %e,
                    "Quota check failed, allowing request"
                );
                CheckResult::failed_open(e.to_string())
            }
        };

        metrics::record_admission(result.decision_label(), started.elapsed());
        debug!(
            request_type = %request_type,
            user = %context.subject(),
            value,
            decision = result.decision_label(),
            "Admission check"
        );
        result
    }

    async fn evaluate(
        &self,
        request_type: &RequestType,
        value: f64,
        context: &RequestContext,
        now: Instant,
    ) -> Result<CheckResult, QuotaError> {
        if !value.is_finite() || value < 0.0 {
            return Err(QuotaError::InvalidValue(value));
        }

        // 1. Rate limiter
        let key = limiter_key(request_type, context);
        let rate = self.rate_limiter.try_acquire_at(&key, now).await;
        if !rate.allowed {
            let retry_after = rate.retry_after.unwrap_or_default();
            return Ok(CheckResult::rejected(
                RejectReason::RateLimited { key: key.clone() },
                format!("Rate limit exceeded for {}", key),
            )
            .with_retry_after(retry_after)
            .with_recommendations(vec![
                format!("Retry after {:.1}s", retry_after.as_secs_f64()),
                "Spread requests more evenly over time".to_string(),
            ]));
        }

        // 2. Quota limits
        let entries = self.limits.read().await.clone();
        // (current usage, max, projected percentage) of the tightest limit
        let mut tightest: Option<(f64, f64, f64)> = None;

        for entry in entries
            .iter()
            .filter(|e| e.limit.enabled && e.limit.is_applicable(request_type))
        {
            let limit = &entry.limit;
            let (current, snapshot) = {
                let mut usage = entry.usage.lock().await;
                usage.refresh(limit, now);
                (usage.current_usage(), usage.snapshot(limit, now))
            };

            let projected = current + value;
            let percentage = usage_percentage(projected, limit.max_value);

            if projected > limit.max_value {
                let retry_after = Duration::from_millis(snapshot.time_to_reset_ms);
                let violation_usage = QuotaUsage {
                    current_usage: projected,
                    usage_percentage: percentage,
                    is_exceeded: true,
                    ..snapshot
                };
                self.handle_quota_violation(limit, violation_usage, request_type, value, context)
                    .await;

                return Ok(CheckResult::rejected(
                    RejectReason::QuotaExceeded {
                        limit_id: limit.id.clone(),
                        action: limit.action,
                    },
                    format!(
                        "Quota '{}' exceeded: {:.2} of {:.2} ({:.1}%)",
                        limit.name, projected, limit.max_value, percentage
                    ),
                )
                .with_usage(current, limit.max_value, percentage)
                .with_retry_after(retry_after)
                .with_recommendations(recommendations_for(limit, retry_after)));
            }

            if tightest.map_or(true, |(_, _, highest)| percentage > highest) {
                tightest = Some((current, limit.max_value, percentage));
            }
        }

        let (current, max, percentage) = tightest.unwrap_or((0.0, 0.0, 0.0));

        // 3. Throttle
        let outcome = {
            let mut throttle = self.throttle.lock().await;
            if throttle.controller.is_enabled() {
                Some(throttle.controller.apply())
            } else {
                None
            }
        };

        let mut result = match outcome {
            Some(outcome) => {
                metrics::record_throttle_state(true, outcome.delay.as_millis() as u64);
                if !outcome.allowed {
                    return Ok(CheckResult::rejected(
                        RejectReason::Throttled,
                        format!("Request throttled, retry after {} ms", outcome.delay.as_millis()),
                    )
                    .with_usage(current, max, percentage)
                    .with_retry_after(outcome.delay)
                    .with_throttle_delay(outcome.delay)
                    .with_recommendations(vec![
                        "Throttling is active; back off before retrying".to_string(),
                    ]));
                }
                CheckResult::allow(current, max, percentage).with_throttle_delay(outcome.delay)
            }
            None => CheckResult::allow(current, max, percentage),
        };

        if percentage >= self.config.warning_threshold_percent {
            result.message = format!("Request allowed, quota at {:.1}%", percentage);
            result.recommendations = vec!["Usage is approaching the quota limit".to_string()];
        }
        Ok(result)
    }

    /// Record a violation, apply the limit's action and publish `limit_exceeded`
    async fn handle_quota_violation(
        &self,
        limit: &QuotaLimit,
        usage: QuotaUsage,
        request_type: &RequestType,
        value: f64,
        context: &RequestContext,
    ) {
        let violation = QuotaViolation::new(
            limit.name.clone(),
            usage,
            request_type.clone(),
            value,
            context.user_id.clone(),
            limit.action,
        );
        let severity = violation.severity;
        metrics::QUOTA_VIOLATIONS_TOTAL
            .with_label_values(&[severity.to_string().as_str()])
            .inc();

        let logging = self.config.enable_violation_logging;
        let percentage = violation.usage.usage_percentage;
        match limit.action {
            LimitAction::Block => {
                if logging {
                    warn!(limit_id = %limit.id, usage_percentage = percentage, %severity, "Request blocked by quota");
                }
            }
            LimitAction::Throttle => {
                if logging {
                    warn!(limit_id = %limit.id, usage_percentage = percentage, %severity, "Quota exceeded, throttling traffic");
                }
            }
            LimitAction::Warn => {
                if logging {
                    warn!(limit_id = %limit.id, usage_percentage = percentage, %severity, "Quota exceeded");
                }
            }
            LimitAction::Log => {
                if logging {
                    info!(limit_id = %limit.id, usage_percentage = percentage, %severity, "Quota exceeded");
                }
            }
        }

        let enabled_throttling = {
            let mut throttle = self.throttle.lock().await;
            throttle.last_violation = Some(Instant::now());
            if limit.action == LimitAction::Throttle && !throttle.controller.is_enabled() {
                throttle.controller.set_enabled(true);
                throttle.auto_enabled = true;
                true
            } else {
                false
            }
        };

        let data = serde_json::to_value(&violation).unwrap_or_default();
        self.violations.write().await.push(violation);
        self.emit(EventType::LimitExceeded, severity, data).await;

        if enabled_throttling {
            metrics::record_throttle_state(true, 0);
            self.emit(
                EventType::ThrottlingChanged,
                Severity::Warning,
                json!({"enabled": true, "reason": "violation", "limit_id": limit.id}),
            )
            .await;
        }
    }

    /// Commit usage against every enabled, applicable limit
    ///
    /// Never rejects. Non-finite or negative values are ignored.
    pub async fn record_usage(&self, request_type: &RequestType, value: f64, context: &RequestContext) {
        if !value.is_finite() || value < 0.0 {
            warn!(request_type = %request_type, value, "Ignoring invalid usage value");
            return;
        }

        let now = Instant::now();
        let threshold = self.config.warning_threshold_percent;
        let entries = self.limits.read().await.clone();
        let mut snapshots = Vec::new();
        let mut crossed = Vec::new();

        for entry in entries
            .iter()
            .filter(|e| e.limit.enabled && e.limit.is_applicable(request_type))
        {
            let limit = &entry.limit;
            let snapshot = {
                let mut usage = entry.usage.lock().await;
                usage.refresh(limit, now);
                let before = usage_percentage(usage.current_usage(), limit.max_value);
                usage.record(limit, value, now);
                let snapshot = usage.snapshot(limit, now);
                if before < threshold && snapshot.usage_percentage >= threshold {
                    crossed.push(snapshot.clone());
                }
                snapshot
            };
            snapshots.push(snapshot);
        }

        metrics::USAGE_RECORDED_TOTAL
            .with_label_values(&[request_type.as_str()])
            .inc();
        debug!(request_type = %request_type, value, limits = snapshots.len(), "Usage recorded");

        self.emit(
            EventType::UsageUpdated,
            Severity::Info,
            json!({
                "request_type": request_type,
                "value": value,
                "user_id": context.user_id,
                "session_id": context.session_id,
                "model": context.model,
                "operation": context.operation,
                "usage": snapshots,
            }),
        )
        .await;

        for snapshot in crossed {
            warn!(
                limit_id = %snapshot.limit_id,
                usage_percentage = snapshot.usage_percentage,
                "Quota usage reached warning threshold"
            );
            self.emit(
                EventType::ThresholdReached,
                Severity::Warning,
                json!({"limit_id": snapshot.limit_id, "threshold_percent": threshold, "usage": snapshot}),
            )
            .await;
        }
    }

    /// Check and, if allowed, record in one step
    pub async fn check_and_record(
        &self,
        request_type: &RequestType,
        value: f64,
        context: &RequestContext,
    ) -> CheckResult {
        let _guard = self.admission.lock().await;
        let result = self.check_request_allowed(request_type, value, context).await;
        if result.allowed() {
            self.record_usage(request_type, value, context).await;
        }
        result
    }

    /// Register a limit; an existing limit with the same id is replaced and its usage reset
    pub async fn add_quota_limit(&self, limit: QuotaLimit) -> Result<(), QuotaError> {
        limit.validate()?;

        let entry = LimitEntry::new(limit.clone(), Instant::now());
        let replaced = {
            let mut limits = self.limits.write().await;
            match limits.iter_mut().find(|e| e.limit.id == limit.id) {
                Some(existing) => {
                    *existing = entry;
                    true
                }
                None => {
                    limits.push(entry);
                    false
                }
            }
        };

        info!(limit_id = %limit.id, max_value = limit.max_value, window_ms = limit.window_ms, replaced, "Quota limit added");
        self.emit(
            EventType::SettingsChanged,
            Severity::Info,
            json!({"action": "limit_added", "limit": limit, "replaced": replaced}),
        )
        .await;
        Ok(())
    }

    /// Replace a limit's configuration, keeping its usage
    pub async fn update_quota_limit(&self, limit: QuotaLimit) -> Result<(), QuotaError> {
        limit.validate()?;

        {
            let mut limits = self.limits.write().await;
            let existing = limits
                .iter_mut()
                .find(|e| e.limit.id == limit.id)
                .ok_or_else(|| QuotaError::UnknownLimit(limit.id.clone()))?;
            existing.limit = limit.clone();
        }

        info!(limit_id = %limit.id, "Quota limit updated");
        self.emit(
            EventType::SettingsChanged,
            Severity::Info,
            json!({"action": "limit_updated", "limit": limit}),
        )
        .await;
        Ok(())
    }

    /// Deregister a limit and discard its usage
    pub async fn remove_quota_limit(&self, limit_id: &str) -> Result<QuotaLimit, QuotaError> {
        let removed = {
            let mut limits = self.limits.write().await;
            let index = limits
                .iter()
                .position(|e| e.limit.id == limit_id)
                .ok_or_else(|| QuotaError::UnknownLimit(limit_id.to_string()))?;
            limits.remove(index).limit
        };

        info!(limit_id = %limit_id, "Quota limit removed");
        self.emit(
            EventType::SettingsChanged,
            Severity::Info,
            json!({"action": "limit_removed", "limit_id": limit_id}),
        )
        .await;
        Ok(removed)
    }

    /// Registered limits in registration order
    pub async fn get_quota_limits(&self) -> Vec<QuotaLimit> {
        self.limits.read().await.iter().map(|e| e.limit.clone()).collect()
    }

    /// Current usage of every limit, keyed by limit id
    pub async fn get_quota_usage(&self) -> HashMap<String, QuotaUsage> {
        let now = Instant::now();
        let entries = self.limits.read().await.clone();
        let mut usage = HashMap::with_capacity(entries.len());
        for entry in entries {
            let mut window = entry.usage.lock().await;
            window.refresh(&entry.limit, now);
            usage.insert(entry.limit.id.clone(), window.snapshot(&entry.limit, now));
        }
        usage
    }

    pub async fn get_limit_usage(&self, limit_id: &str) -> Option<QuotaUsage> {
        let now = Instant::now();
        let entry = self
            .limits
            .read()
            .await
            .iter()
            .find(|e| e.limit.id == limit_id)
            .cloned()?;
        let mut window = entry.usage.lock().await;
        window.refresh(&entry.limit, now);
        Some(window.snapshot(&entry.limit, now))
    }

    /// Recorded violations, oldest first
    pub async fn get_violations(&self) -> Vec<QuotaViolation> {
        self.violations.read().await.list()
    }

    /// Start a limit's window over, empty
    pub async fn reset_quota_usage(&self, limit_id: &str) -> Result<(), QuotaError> {
        let entry = self
            .limits
            .read()
            .await
            .iter()
            .find(|e| e.limit.id == limit_id)
            .cloned()
            .ok_or_else(|| QuotaError::UnknownLimit(limit_id.to_string()))?;

        *entry.usage.lock().await = UsageWindow::new(&entry.limit, Instant::now());

        info!(limit_id = %limit_id, "Quota usage reset");
        self.emit(EventType::BudgetReset, Severity::Info, json!({"limit_id": limit_id}))
            .await;
        Ok(())
    }

    /// Toggle throttling, optionally replacing its configuration
    pub async fn set_throttling(&self, enabled: bool, config: Option<ThrottleConfig>) -> Result<(), QuotaError> {
        if let Some(config) = &config {
            config.validate().map_err(QuotaError::InvalidConfig)?;
        }

        let (changed, status) = {
            let mut throttle = self.throttle.lock().await;
            if let Some(config) = config {
                throttle.controller.set_config(config);
            }
            let changed = throttle.controller.set_enabled(enabled);
            throttle.auto_enabled = false;
            (changed, ThrottleStatus::from(&throttle.controller))
        };

        metrics::record_throttle_state(status.enabled, status.current_delay_ms);
        info!(enabled, factor = status.config.factor, strategy = %status.config.backoff_strategy, "Throttling updated");
        if changed {
            self.emit(
                EventType::ThrottlingChanged,
                Severity::Info,
                json!({"enabled": enabled, "reason": "manual", "config": status.config}),
            )
            .await;
        }
        Ok(())
    }

    pub async fn throttle_status(&self) -> ThrottleStatus {
        ThrottleStatus::from(&self.throttle.lock().await.controller)
    }

    /// Replace the rate limiter configuration; per-key state starts over
    pub async fn set_rate_limit_config(&self, config: RateLimitConfig) -> Result<(), QuotaError> {
        config.validate().map_err(QuotaError::InvalidConfig)?;
        info!(max_requests = config.max_requests, window_ms = config.window_ms, strategy = %config.strategy, "Rate limit updated");
        self.rate_limiter.set_config(config).await;
        Ok(())
    }

    /// Refresh usage windows, drop idle rate limiters and apply auto adjustment
    pub async fn run_maintenance(&self) {
        let now = Instant::now();

        let entries = self.limits.read().await.clone();
        for entry in &entries {
            entry.usage.lock().await.refresh(&entry.limit, now);
        }

        let ttl = self.rate_limiter.idle_ttl().await;
        let removed = self.rate_limiter.cleanup_idle_at(ttl, now).await;
        if removed > 0 {
            debug!(removed, "Dropped idle rate limiters");
        }

        if self.config.enable_auto_adjustment {
            self.auto_adjust(now).await;
        }
    }

    async fn auto_adjust(&self, now: Instant) {
        let grace_period = self.config.grace_period();
        let released = {
            let mut throttle = self.throttle.lock().await;
            let quiet = throttle
                .last_violation
                .map_or(true, |last| now.saturating_duration_since(last) >= grace_period);
            if throttle.auto_enabled && throttle.controller.is_enabled() && quiet {
                throttle.controller.set_enabled(false);
                throttle.auto_enabled = false;
                true
            } else {
                false
            }
        };

        if released {
            metrics::record_throttle_state(false, 0);
            info!(grace_period_ms = grace_period.as_millis() as u64, "No violations during grace period, throttling released");
            self.emit(
                EventType::ThrottlingChanged,
                Severity::Info,
                json!({"enabled": false, "reason": "auto_adjustment"}),
            )
            .await;
        }
    }

    /// Start periodic maintenance; a running task is replaced
    pub async fn start_maintenance(&self) {
        let manager = self.clone();
        let period = self.config.maintenance_interval();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.run_maintenance().await;
            }
        });

        if let Some(previous) = self.maintenance_task.write().await.replace(task) {
            previous.abort();
        }
        info!(interval_ms = period.as_millis() as u64, "Quota maintenance started");
    }

    /// Stop background maintenance
    pub async fn shutdown(&self) {
        if let Some(task) = self.maintenance_task.write().await.take() {
            task.abort();
            info!("Quota maintenance stopped");
        }
    }
}

fn recommendations_for(limit: &QuotaLimit, retry_after: Duration) -> Vec<String> {
    match limit.action {
        LimitAction::Block => vec![
            format!("Wait {:.1}s for the '{}' window to free up", retry_after.as_secs_f64(), limit.name),
            format!("Reduce request volume or raise the '{}' limit", limit.id),
        ],
        LimitAction::Throttle => vec![
            "Throttling has been enabled; back off before retrying".to_string(),
            format!("Reduce request volume against '{}'", limit.id),
        ],
        LimitAction::Warn | LimitAction::Log => {
            vec![format!("Review usage against the '{}' limit", limit.id)]
        }
    }
}
