//! Throttle Controller
//!
//! A global brake applied to traffic that already passed the quota checks.
//! Each application grows a shared backoff delay and draws against the
//! pass-through factor to decide whether this particular call is throttled.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// How the delay grows between consecutive applications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Add `min_delay` each time
    Linear,
    /// Double each time
    #[default]
    Exponential,
    /// Uniform draw in `[min_delay, max_delay]`
    Random,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
            BackoffStrategy::Random => write!(f, "random"),
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            "random" => Ok(BackoffStrategy::Random),
            other => Err(format!("unknown backoff strategy: {}", other)),
        }
    }
}

/// Throttle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Target pass-through probability (0.0 to 1.0)
    pub factor: f64,
    /// Delay in milliseconds used for the first application
    pub min_delay_ms: u64,
    /// Upper bound on the delay in milliseconds
    pub max_delay_ms: u64,
    pub backoff_strategy: BackoffStrategy,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            factor: 0.5,
            min_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_strategy: BackoffStrategy::Exponential,
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.factor) {
            return Err(format!("throttle factor must be within [0, 1], got {}", self.factor));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(format!(
                "throttle min_delay_ms ({}) exceeds max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}

/// Outcome of one throttle application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleOutcome {
    pub allowed: bool,
    /// Backoff hint, reported whether or not the call was throttled
    pub delay: Duration,
}

/// Throttle controller
///
/// Not synchronised; the owner serialises access.
#[derive(Debug, Clone)]
pub struct ThrottleController {
    config: ThrottleConfig,
    enabled: bool,
    current_delay_ms: u64,
}

impl ThrottleController {
    /// Create a disabled controller
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            enabled: false,
            current_delay_ms: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable; returns true if the state changed
    ///
    /// Disabling clears the accumulated delay.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        let changed = self.enabled != enabled;
        self.enabled = enabled;
        if !enabled {
            self.current_delay_ms = 0;
        }
        changed
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ThrottleConfig) {
        self.config = config;
        self.current_delay_ms = self.current_delay_ms.min(self.config.max_delay_ms);
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current_delay_ms)
    }

    /// Apply throttling to one call
    pub fn apply(&mut self) -> ThrottleOutcome {
        self.apply_with_draw(fastrand::f64())
    }

    /// Apply throttling with an explicit draw in `[0, 1)`
    ///
    /// The call is throttled when `draw >= factor`, so a factor of 0 always
    /// throttles and a factor of 1 never does.
    pub fn apply_with_draw(&mut self, draw: f64) -> ThrottleOutcome {
        if !self.enabled {
            return ThrottleOutcome {
                allowed: true,
                delay: Duration::ZERO,
            };
        }

        self.current_delay_ms = self.next_delay_ms();
        let allowed = draw < self.config.factor;

        debug!(
            delay_ms = self.current_delay_ms,
            strategy = %self.config.backoff_strategy,
            allowed,
            "Throttle applied"
        );

        ThrottleOutcome {
            allowed,
            delay: self.current_delay(),
        }
    }

    fn next_delay_ms(&self) -> u64 {
        let min = self.config.min_delay_ms;
        let max = self.config.max_delay_ms;

        let next = if self.current_delay_ms == 0 {
            min
        } else {
            match self.config.backoff_strategy {
                BackoffStrategy::Linear => self.current_delay_ms.saturating_add(min),
                BackoffStrategy::Exponential => self.current_delay_ms.saturating_mul(2),
                BackoffStrategy::Random if min < max => fastrand::u64(min..=max),
                BackoffStrategy::Random => min,
            }
        };

        next.min(max)
    }
}

impl Default for ThrottleController {
    fn default() -> Self {
        Self::new(ThrottleConfig::default())
    }
}
