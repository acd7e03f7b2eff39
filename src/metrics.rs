// Prometheus metrics for budget governance
//
// Tracks:
// - Admission decisions (counter by outcome)
// - Quota violations (counter by severity)
// - Recorded usage (counter by request type)
// - Throttle state (gauges)
// - Event bus traffic and drops (counters)

use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref ADMISSION_CHECKS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("budgetguard_admission_checks_total", "Admission checks by decision"),
        &["decision"]
    ).expect("Failed to create admission checks metric");

    pub static ref ADMISSION_CHECK_DURATION_SECONDS: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "budgetguard_admission_check_duration_seconds",
            "Time spent evaluating an admission check"
        ).buckets(vec![0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01]),
    ).expect("Failed to create admission check duration metric");

    pub static ref QUOTA_VIOLATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("budgetguard_quota_violations_total", "Quota violations by severity"),
        &["severity"]
    ).expect("Failed to create quota violations metric");

    pub static ref USAGE_RECORDED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("budgetguard_usage_recorded_total", "Usage records by request type"),
        &["request_type"]
    ).expect("Failed to create usage recorded metric");

    // Throttle metrics
    pub static ref THROTTLE_ACTIVE: IntGauge = IntGauge::new(
        "budgetguard_throttle_active",
        "1 while global throttling is enabled"
    ).expect("Failed to create throttle active metric");

    pub static ref THROTTLE_DELAY_MS: IntGauge = IntGauge::new(
        "budgetguard_throttle_delay_ms",
        "Current throttle backoff delay in milliseconds"
    ).expect("Failed to create throttle delay metric");

    // Event bus metrics
    pub static ref BUS_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("budgetguard_bus_events_total", "Events emitted on the bus by type"),
        &["event_type"]
    ).expect("Failed to create bus events metric");

    pub static ref BUS_EVENTS_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "budgetguard_bus_events_dropped_total",
        "Deliveries dropped by subscription rate limits or full queues"
    ).expect("Failed to create bus dropped events metric");
}

/// Initialize metrics registry - call once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ADMISSION_CHECKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_CHECK_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(QUOTA_VIOLATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(USAGE_RECORDED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(THROTTLE_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(THROTTLE_DELAY_MS.clone()))?;
    REGISTRY.register(Box::new(BUS_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BUS_EVENTS_DROPPED_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

pub(crate) fn record_admission(decision: &str, elapsed: std::time::Duration) {
    ADMISSION_CHECKS_TOTAL.with_label_values(&[decision]).inc();
    ADMISSION_CHECK_DURATION_SECONDS.observe(elapsed.as_secs_f64());
}

pub(crate) fn record_throttle_state(enabled: bool, delay_ms: u64) {
    THROTTLE_ACTIVE.set(enabled as i64);
    THROTTLE_DELAY_MS.set(delay_ms.min(i64::MAX as u64) as i64);
}
