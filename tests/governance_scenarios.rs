// End-to-end governance scenarios
//
// Drive the quota manager and the event bus together through the public API,
// with a paused tokio clock wherever windows matter.

use budgetguard::events::{
    channel_handler, EventBus, EventFilter, EventSubscription, HistoryQuery, ListenerChannel, RoutingRule,
};
use budgetguard::quota::{
    LimitAction, LimitType, QuotaLimit, QuotaManager, QuotaManagerConfig, RejectReason, ResetBehavior,
};
use budgetguard::rate_limit::{SlidingWindowCounter, TokenBucket};
use budgetguard::throttle::{BackoffStrategy, ThrottleConfig, ThrottleController};
use budgetguard::types::{BudgetEvent, EventType, RequestContext, RequestType, Severity};
use std::time::Duration;

fn manager_with(limits: Vec<QuotaLimit>) -> QuotaManager {
    QuotaManager::new(QuotaManagerConfig {
        default_limits: limits,
        ..QuotaManagerConfig::default()
    })
    .unwrap()
}

fn event(event_type: EventType) -> BudgetEvent {
    BudgetEvent::new(event_type, "scenario", serde_json::json!({}))
}

#[tokio::test(start_paused = true)]
async fn test_fixed_window_quota_blocks_eleventh_request_until_reset() {
    let limit = QuotaLimit::new("burst", LimitType::Requests, 10.0, Duration::from_millis(1000))
        .with_reset_behavior(ResetBehavior::Fixed);
    let manager = manager_with(vec![limit]);
    let ctx = RequestContext::for_user("alice");

    for _ in 0..10 {
        let result = manager.check_request_allowed(&RequestType::ApiCall, 1.0, &ctx).await;
        assert!(result.allowed());
        manager.record_usage(&RequestType::ApiCall, 1.0, &ctx).await;
    }

    let blocked = manager.check_request_allowed(&RequestType::ApiCall, 1.0, &ctx).await;
    assert!(!blocked.allowed());
    assert_eq!(blocked.decision_label(), "quota_exceeded");
    assert_eq!(manager.get_violations().await.len(), 1);

    tokio::time::advance(Duration::from_millis(1000)).await;

    let allowed = manager.check_request_allowed(&RequestType::ApiCall, 1.0, &ctx).await;
    assert!(allowed.allowed());
    assert_eq!(allowed.current_usage, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_sliding_quota_frees_capacity_gradually() {
    let limit = QuotaLimit::new("spend", LimitType::Cost, 5.0, Duration::from_secs(10));
    let manager = manager_with(vec![limit]);
    let ctx = RequestContext::default();

    manager.record_usage(&RequestType::Cost, 3.0, &ctx).await;
    tokio::time::advance(Duration::from_secs(5)).await;
    manager.record_usage(&RequestType::Cost, 2.0, &ctx).await;

    assert!(!manager.check_request_allowed(&RequestType::Cost, 1.0, &ctx).await.allowed());

    // The first entry leaves the window; the second is still counted
    tokio::time::advance(Duration::from_secs(5)).await;
    let result = manager.check_request_allowed(&RequestType::Cost, 1.0, &ctx).await;
    assert!(result.allowed());
    assert_eq!(result.current_usage, 2.0);
}

#[tokio::test]
async fn test_reset_round_trip_restores_capacity() {
    let limit = QuotaLimit::new("daily", LimitType::Requests, 2.0, Duration::from_secs(86_400))
        .with_reset_behavior(ResetBehavior::Fixed);
    let manager = manager_with(vec![limit]);
    let ctx = RequestContext::default();

    assert!(manager.check_and_record(&RequestType::ApiCall, 1.0, &ctx).await.allowed());
    assert!(manager.check_and_record(&RequestType::ApiCall, 1.0, &ctx).await.allowed());
    assert!(!manager.check_and_record(&RequestType::ApiCall, 1.0, &ctx).await.allowed());

    manager.reset_quota_usage("daily").await.unwrap();

    let usage = manager.get_limit_usage("daily").await.unwrap();
    assert_eq!(usage.current_usage, 0.0);
    assert!(!usage.is_exceeded);
    assert!(manager.check_and_record(&RequestType::ApiCall, 1.0, &ctx).await.allowed());
}

#[test]
fn test_exponential_throttle_sequence() {
    let mut controller = ThrottleController::new(ThrottleConfig {
        factor: 0.5,
        min_delay_ms: 100,
        max_delay_ms: 5000,
        backoff_strategy: BackoffStrategy::Exponential,
    });
    controller.set_enabled(true);

    let delays: Vec<u64> = (0..9)
        .map(|_| controller.apply_with_draw(0.0).delay.as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![100, 200, 400, 800, 1600, 3200, 5000, 5000, 5000]);

    assert!(!controller.apply_with_draw(0.9).allowed);

    controller.set_enabled(false);
    assert_eq!(controller.current_delay(), Duration::ZERO);
}

#[test]
fn test_rate_limiter_primitives() {
    let start = tokio::time::Instant::now();

    let mut bucket = TokenBucket::new_at(5, 10.0, start);
    assert!(bucket.try_consume_at(5, start));
    assert!(!bucket.try_consume_at(1, start));
    assert!(bucket.try_consume_at(1, start + Duration::from_millis(100)));

    let mut window = SlidingWindowCounter::new(3, Duration::from_secs(1));
    for _ in 0..3 {
        assert!(window.is_allowed_at(start));
    }
    assert!(!window.is_allowed_at(start + Duration::from_millis(999)));
    assert!(window.is_allowed_at(start + Duration::from_secs(1)));
}

#[tokio::test]
async fn test_routing_fans_out_by_priority() {
    let bus = EventBus::default();
    let (pager, mut pager_rx) = channel_handler();
    let (audit, mut audit_rx) = channel_handler();
    bus.on(ListenerChannel::Target("pager".into()), pager).await;
    bus.on(ListenerChannel::Target("audit-log".into()), audit).await;

    bus.add_routing_rule(RoutingRule::new(
        "audit-everything",
        EventFilter::new(),
        ["audit-log"],
        1,
    ))
    .await
    .unwrap();
    bus.add_routing_rule(RoutingRule::new(
        "page-on-critical",
        EventFilter::new().with_severities([Severity::Critical]),
        ["pager"],
        10,
    ))
    .await
    .unwrap();

    let report = bus
        .emit_budget_event(event(EventType::LimitExceeded).with_severity(Severity::Critical))
        .await;
    assert_eq!(report.routed_targets, vec!["pager".to_string(), "audit-log".to_string()]);
    assert!(pager_rx.recv().await.is_some());
    assert!(audit_rx.recv().await.is_some());

    let report = bus.emit_budget_event(event(EventType::UsageUpdated)).await;
    assert_eq!(report.routed_targets, vec!["audit-log".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_filter_and_rate_limit() {
    let bus = EventBus::default();
    let (handler, mut rx) = channel_handler();
    let filter = EventFilter::new()
        .with_types([EventType::LimitExceeded])
        .with_rate_limit(2, Duration::from_millis(1000));
    bus.subscribe(EventSubscription::new(handler).with_filter(filter))
        .await
        .unwrap();

    bus.emit_budget_event(event(EventType::UsageUpdated)).await;
    for _ in 0..3 {
        bus.emit_budget_event(event(EventType::LimitExceeded)).await;
    }

    assert_eq!(rx.recv().await.unwrap().event_type, EventType::LimitExceeded);
    assert_eq!(rx.recv().await.unwrap().event_type, EventType::LimitExceeded);
    assert!(rx.try_recv().is_err());
    assert_eq!(bus.get_statistics().await.dropped_events, 1);

    tokio::time::advance(Duration::from_millis(1001)).await;
    let report = bus.emit_budget_event(event(EventType::LimitExceeded)).await;
    assert_eq!(report.delivered, 1);
    assert!(rx.recv().await.is_some());
}

#[tokio::test]
async fn test_violations_reach_late_subscribers_through_history() {
    let bus = EventBus::default();
    let limit = QuotaLimit::new("tokens", LimitType::Tokens, 100.0, Duration::from_secs(60))
        .with_action(LimitAction::Warn);
    let manager = manager_with(vec![limit]).with_event_bus(bus.clone());
    let ctx = RequestContext::for_user("bob");

    manager.record_usage(&RequestType::TokenUsage, 90.0, &ctx).await;
    let result = manager.check_request_allowed(&RequestType::TokenUsage, 50.0, &ctx).await;
    assert_eq!(
        result.reject_reason(),
        Some(&RejectReason::QuotaExceeded {
            limit_id: "tokens".into(),
            action: LimitAction::Warn
        })
    );

    let (handler, mut rx) = channel_handler();
    bus.subscribe(
        EventSubscription::new(handler)
            .with_filter(EventFilter::new().with_types([EventType::LimitExceeded]))
            .with_history(),
    )
    .await
    .unwrap();

    let replayed = rx.recv().await.unwrap();
    assert_eq!(replayed.event_type, EventType::LimitExceeded);
    assert_eq!(replayed.data["user_id"], "bob");
    assert_eq!(replayed.data["requested_value"], 50.0);

    let history = bus
        .get_event_history(&HistoryQuery::default().with_types([EventType::ThresholdReached]))
        .await;
    assert_eq!(history.len(), 1);
}
