//! Window Counters
//!
//! Sliding-window and fixed-window admission counters. Like the token bucket,
//! both are pull-based: expired state is pruned on access.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window counter over admission timestamps
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter {
    max_requests: u32,
    window: Duration,
    /// Admission timestamps, oldest first
    admissions: VecDeque<Instant>,
}

impl SlidingWindowCounter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            admissions: VecDeque::with_capacity(max_requests.min(1024) as usize),
        }
    }

    /// Admit and record one request if the trailing window has room
    pub fn is_allowed(&mut self) -> bool {
        self.is_allowed_at(Instant::now())
    }

    pub fn is_allowed_at(&mut self, now: Instant) -> bool {
        self.prune(now);

        if (self.admissions.len() as u32) < self.max_requests {
            self.admissions.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of admissions inside the trailing window
    pub fn current_count(&mut self) -> u32 {
        self.current_count_at(Instant::now())
    }

    pub fn current_count_at(&mut self, now: Instant) -> u32 {
        self.prune(now);
        self.admissions.len() as u32
    }

    /// Time until the oldest admission leaves the window
    pub fn time_until_available(&mut self) -> Duration {
        self.time_until_available_at(Instant::now())
    }

    pub fn time_until_available_at(&mut self, now: Instant) -> Duration {
        self.prune(now);

        if (self.admissions.len() as u32) < self.max_requests {
            return Duration::ZERO;
        }
        match self.admissions.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            // max_requests == 0: nothing is ever admitted
            None => Duration::MAX,
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        // Entries at exactly now - window are expired
        while let Some(oldest) = self.admissions.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Fixed-window counter
///
/// The window restarts at the first access on or after its end, so a burst of
/// calls at the boundary resets the count exactly once.
#[derive(Debug, Clone)]
pub struct FixedWindowCounter {
    max_requests: u32,
    window: Duration,
    window_start: Instant,
    count: u32,
}

impl FixedWindowCounter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::new_at(max_requests, window, Instant::now())
    }

    pub fn new_at(max_requests: u32, window: Duration, now: Instant) -> Self {
        Self {
            max_requests,
            window,
            window_start: now,
            count: 0,
        }
    }

    pub fn is_allowed(&mut self) -> bool {
        self.is_allowed_at(Instant::now())
    }

    pub fn is_allowed_at(&mut self, now: Instant) -> bool {
        self.roll(now);

        if self.count < self.max_requests {
            self.count += 1;
            true
        } else {
            false
        }
    }

    pub fn current_count_at(&mut self, now: Instant) -> u32 {
        self.roll(now);
        self.count
    }

    pub fn time_until_available_at(&mut self, now: Instant) -> Duration {
        self.roll(now);

        if self.count < self.max_requests {
            Duration::ZERO
        } else {
            (self.window_start + self.window).saturating_duration_since(now)
        }
    }

    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    fn roll(&mut self, now: Instant) {
        if now >= self.window_start + self.window {
            self.window_start = now;
            self.count = 0;
        }
    }
}
