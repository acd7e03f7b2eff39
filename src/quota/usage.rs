//! Usage Windows
//!
//! Runtime usage state for one quota limit and the read-only snapshot handed
//! out to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::limit::{QuotaLimit, ResetBehavior};

/// Upper bound on recorded entries per limit
pub const MAX_RECENT_ENTRIES: usize = 10_000;

/// Entries older than this are always pruned
pub const MAX_RETENTION: Duration = Duration::from_secs(3600);

/// Mutable usage state for one limit
///
/// For sliding limits `current_usage` is always the sum of `recent`; for fixed
/// limits it is the running total since the window started.
#[derive(Debug, Clone)]
pub struct UsageWindow {
    current_usage: f64,
    window_start: Instant,
    window_end: Instant,
    /// (timestamp, value), oldest first
    recent: VecDeque<(Instant, f64)>,
}

impl UsageWindow {
    /// Fresh, empty window for `limit`
    pub fn new(limit: &QuotaLimit, now: Instant) -> Self {
        let (window_start, window_end) = Self::bounds(limit, now);
        Self {
            current_usage: 0.0,
            window_start,
            window_end,
            recent: VecDeque::new(),
        }
    }

    fn bounds(limit: &QuotaLimit, now: Instant) -> (Instant, Instant) {
        match limit.reset_behavior {
            ResetBehavior::Fixed => (now, now + limit.window()),
            ResetBehavior::Sliding => (now.checked_sub(limit.window()).unwrap_or(now), now),
        }
    }

    /// Bring the window up to date with `now`
    pub fn refresh(&mut self, limit: &QuotaLimit, now: Instant) {
        match limit.reset_behavior {
            ResetBehavior::Fixed => {
                if now >= self.window_end {
                    self.current_usage = 0.0;
                    self.recent.clear();
                    self.window_start = now;
                    self.window_end = now + limit.window();
                }
            }
            ResetBehavior::Sliding => {
                self.prune(Self::retention(limit), now);
                self.current_usage = self.recent.iter().map(|(_, value)| value).sum();
                self.window_start = now.checked_sub(limit.window()).unwrap_or(now);
                self.window_end = now;
            }
        }
    }

    /// Add `value` at `now`
    pub fn record(&mut self, limit: &QuotaLimit, value: f64, now: Instant) {
        self.refresh(limit, now);

        self.recent.push_back((now, value));
        if self.recent.len() > MAX_RECENT_ENTRIES {
            self.recent.pop_front();
        }

        match limit.reset_behavior {
            ResetBehavior::Fixed => {
                self.prune(MAX_RETENTION, now);
                self.current_usage += value;
            }
            ResetBehavior::Sliding => {
                self.current_usage = self.recent.iter().map(|(_, value)| value).sum();
            }
        }
    }

    /// Sliding limits keep entries for the window or one hour, whichever is shorter
    fn retention(limit: &QuotaLimit) -> Duration {
        limit.window().min(MAX_RETENTION)
    }

    fn prune(&mut self, retention: Duration, now: Instant) {
        while let Some((timestamp, _)) = self.recent.front() {
            if now.saturating_duration_since(*timestamp) >= retention {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn current_usage(&self) -> f64 {
        self.current_usage
    }

    pub fn entry_count(&self) -> usize {
        self.recent.len()
    }

    /// Sum of the recorded entries still held
    pub fn recent_total(&self) -> f64 {
        self.recent.iter().map(|(_, value)| value).sum()
    }

    /// Time until usage drops: the fixed window end, or the oldest sliding entry expiring
    pub fn time_to_reset(&self, limit: &QuotaLimit, now: Instant) -> Duration {
        match limit.reset_behavior {
            ResetBehavior::Fixed => self.window_end.saturating_duration_since(now),
            ResetBehavior::Sliding => match self.recent.front() {
                Some((oldest, _)) => (*oldest + Self::retention(limit)).saturating_duration_since(now),
                None => Duration::ZERO,
            },
        }
    }

    /// Read-only snapshot
    pub fn snapshot(&self, limit: &QuotaLimit, now: Instant) -> QuotaUsage {
        let wall_now = Utc::now();
        QuotaUsage {
            limit_id: limit.id.clone(),
            current_usage: self.current_usage,
            max_value: limit.max_value,
            usage_percentage: usage_percentage(self.current_usage, limit.max_value),
            window_start: to_wall_clock(self.window_start, now, wall_now),
            window_end: to_wall_clock(self.window_end, now, wall_now),
            is_exceeded: self.current_usage >= limit.max_value,
            time_to_reset_ms: self.time_to_reset(limit, now).as_millis() as u64,
            recent_entries: self.recent.len(),
        }
    }
}

/// Percentage of `max_value` that `usage` represents
pub fn usage_percentage(usage: f64, max_value: f64) -> f64 {
    if max_value > 0.0 {
        usage / max_value * 100.0
    } else {
        0.0
    }
}

fn to_wall_clock(instant: Instant, now: Instant, wall_now: DateTime<Utc>) -> DateTime<Utc> {
    let offset = |d: Duration| chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
    if instant >= now {
        wall_now + offset(instant - now)
    } else {
        wall_now - offset(now - instant)
    }
}

/// Usage snapshot for one limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub limit_id: String,
    pub current_usage: f64,
    pub max_value: f64,
    pub usage_percentage: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// No headroom left in the window
    pub is_exceeded: bool,
    pub time_to_reset_ms: u64,
    pub recent_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::limit::LimitType;

    fn fixed(max: f64, window_ms: u64) -> QuotaLimit {
        QuotaLimit::new("fixed", LimitType::Requests, max, Duration::from_millis(window_ms))
            .with_reset_behavior(ResetBehavior::Fixed)
    }

    fn sliding(max: f64, window_ms: u64) -> QuotaLimit {
        QuotaLimit::new("sliding", LimitType::Cost, max, Duration::from_millis(window_ms))
    }

    #[test]
    fn test_fixed_window_resets_at_boundary() {
        let limit = fixed(10.0, 1000);
        let start = Instant::now();
        let mut window = UsageWindow::new(&limit, start);

        for _ in 0..10 {
            window.record(&limit, 1.0, start + Duration::from_millis(100));
        }
        window.refresh(&limit, start + Duration::from_millis(999));
        assert_eq!(window.current_usage(), 10.0);

        let boundary = start + Duration::from_millis(1000);
        window.refresh(&limit, boundary);
        assert_eq!(window.current_usage(), 0.0);

        // Usage recorded right after the reset survives another refresh at the same instant
        window.record(&limit, 3.0, boundary);
        window.refresh(&limit, boundary);
        assert_eq!(window.current_usage(), 3.0);
        assert_eq!(window.time_to_reset(&limit, boundary), Duration::from_millis(1000));
    }

    #[test]
    fn test_sliding_window_sums_trailing_entries() {
        let limit = sliding(100.0, 1000);
        let start = Instant::now();
        let mut window = UsageWindow::new(&limit, start);

        window.record(&limit, 2.0, start);
        window.record(&limit, 3.0, start + Duration::from_millis(600));
        assert_eq!(window.current_usage(), 5.0);

        window.refresh(&limit, start + Duration::from_millis(1000));
        assert_eq!(window.current_usage(), 3.0);
        assert_eq!(window.current_usage(), window.recent_total());

        window.refresh(&limit, start + Duration::from_millis(1600));
        assert_eq!(window.current_usage(), 0.0);
        assert_eq!(window.entry_count(), 0);
    }

    #[test]
    fn test_sliding_retention_is_capped_at_one_hour() {
        let limit = sliding(100.0, 2 * 3600 * 1000);
        let start = Instant::now();
        let mut window = UsageWindow::new(&limit, start);

        window.record(&limit, 4.0, start);
        window.refresh(&limit, start + Duration::from_secs(3600));
        assert_eq!(window.current_usage(), 0.0);
    }

    #[test]
    fn test_recent_entries_are_bounded() {
        let limit = sliding(1e9, 60_000);
        let now = Instant::now();
        let mut window = UsageWindow::new(&limit, now);

        for _ in 0..(MAX_RECENT_ENTRIES + 5) {
            window.record(&limit, 1.0, now);
        }
        assert_eq!(window.entry_count(), MAX_RECENT_ENTRIES);
        assert_eq!(window.current_usage(), MAX_RECENT_ENTRIES as f64);
    }

    #[test]
    fn test_snapshot() {
        let limit = fixed(10.0, 1000);
        let now = Instant::now();
        let mut window = UsageWindow::new(&limit, now);
        window.record(&limit, 10.0, now);

        let usage = window.snapshot(&limit, now);
        assert_eq!(usage.limit_id, "fixed");
        assert_eq!(usage.usage_percentage, 100.0);
        assert!(usage.is_exceeded);
        assert_eq!(usage.time_to_reset_ms, 1000);
        assert!(usage.window_end > usage.window_start);
    }
}
