// Configuration File Support
//
// TOML configuration for budgetguard with environment variable overrides.
// Without an explicit path the file is read from the platform config dir,
// e.g. ~/.config/budgetguard/config.toml on Linux.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::events::EventBusConfig;
use crate::logging::LoggingConfig;
use crate::quota::QuotaManagerConfig;
use crate::rate_limit::RateLimitStrategy;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "BUDGETGUARD_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Quota manager, rate limiter and throttle
    pub quota: QuotaManagerConfig,

    /// Event bus
    pub events: EventBusConfig,
}

impl Config {
    /// Load configuration from `path`, or from the default location
    ///
    /// A missing file yields the defaults (with environment overrides applied).
    /// A file that exists but cannot be parsed, or that fails validation, is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load_from_path(Self::config_path()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::debug!(path = ?path, "Loaded configuration file");
            config
        } else {
            tracing::debug!(path = ?path, "Config file not found, using defaults");
            Self::default()
        };

        let config = config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration file path
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "budgetguard", "budgetguard") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config").join("budgetguard").join("config.toml")
        }
    }

    /// Apply `BUDGETGUARD_*` environment variables
    ///
    /// - BUDGETGUARD_LOG_LEVEL
    /// - BUDGETGUARD_LOG_FORMAT
    /// - BUDGETGUARD_RATE_LIMIT_MAX_REQUESTS
    /// - BUDGETGUARD_RATE_LIMIT_WINDOW_MS
    /// - BUDGETGUARD_RATE_LIMIT_STRATEGY
    /// - BUDGETGUARD_THROTTLE_FACTOR
    /// - BUDGETGUARD_HISTORY_SIZE
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    /// Apply overrides from `lookup`, keyed by variable name without the prefix
    ///
    /// Unparsable values are errors rather than silently ignored.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format.parse().map_err(anyhow::Error::msg)?;
        }

        if let Some(max) = lookup("RATE_LIMIT_MAX_REQUESTS") {
            self.quota.rate_limit.max_requests = max
                .parse()
                .with_context(|| format!("Invalid {}RATE_LIMIT_MAX_REQUESTS: {}", ENV_PREFIX, max))?;
        }
        if let Some(window) = lookup("RATE_LIMIT_WINDOW_MS") {
            self.quota.rate_limit.window_ms = window
                .parse()
                .with_context(|| format!("Invalid {}RATE_LIMIT_WINDOW_MS: {}", ENV_PREFIX, window))?;
        }
        if let Some(strategy) = lookup("RATE_LIMIT_STRATEGY") {
            self.quota.rate_limit.strategy = strategy.parse::<RateLimitStrategy>().map_err(anyhow::Error::msg)?;
        }

        if let Some(factor) = lookup("THROTTLE_FACTOR") {
            self.quota.throttle.factor = factor
                .parse()
                .with_context(|| format!("Invalid {}THROTTLE_FACTOR: {}", ENV_PREFIX, factor))?;
        }

        if let Some(size) = lookup("HISTORY_SIZE") {
            self.events.max_history_size = size
                .parse()
                .with_context(|| format!("Invalid {}HISTORY_SIZE: {}", ENV_PREFIX, size))?;
        }

        Ok(self)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.quota.validate().context("Invalid [quota] configuration")?;
        self.events.validate().context("Invalid [events] configuration")?;
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};
    use crate::quota::{LimitAction, LimitType, ResetBehavior};
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.quota.rate_limit.max_requests, 100);
        assert_eq!(config.quota.rate_limit.strategy, RateLimitStrategy::SlidingWindow);
        assert_eq!(config.quota.default_limits.len(), 2);
        assert_eq!(config.events.max_history_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_nonexistent_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().with_extension("nonexistent");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_toml_sections() {
        let toml_content = r#"
[logging]
level = "debug"
format = "json"

[quota]
warning_threshold_percent = 90.0
enable_auto_adjustment = true

[[quota.default_limits]]
id = "tokens_per_minute"
name = "Tokens per minute"
type = "tokens"
max_value = 50000.0
window_ms = 60000
reset_behavior = "sliding"
action = "throttle"

[quota.rate_limit]
max_requests = 20
window_ms = 1000
strategy = "token_bucket"
burst_limit = 40

[quota.throttle]
factor = 0.25
backoff_strategy = "linear"

[events]
max_history_size = 50
retained_types = ["limit_exceeded", "threshold_reached"]
"#;
        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);

        let limit = &config.quota.default_limits[0];
        assert_eq!(config.quota.default_limits.len(), 1);
        assert_eq!(limit.limit_type, LimitType::Tokens);
        assert_eq!(limit.reset_behavior, ResetBehavior::Sliding);
        assert_eq!(limit.action, LimitAction::Throttle);
        assert!(limit.enabled);

        assert_eq!(config.quota.rate_limit.strategy, RateLimitStrategy::TokenBucket);
        assert_eq!(config.quota.rate_limit.burst_limit, Some(40));
        assert_eq!(config.quota.throttle.factor, 0.25);
        assert_eq!(config.quota.throttle.max_delay_ms, 5000);
        assert_eq!(config.events.max_history_size, 50);
        assert_eq!(config.events.retained_types.as_ref().map(Vec::len), Some(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[events]\nreplay_limit = 10").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.events.replay_limit, 10);
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[quota\nbroken").unwrap();
        assert!(Config::load_from_path(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[quota.throttle]\nfactor = 3.0").unwrap();
        let err = Config::load_from_path(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("throttle factor"));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .apply_overrides(lookup(&[
                ("LOG_LEVEL", "warn"),
                ("LOG_FORMAT", "json"),
                ("RATE_LIMIT_MAX_REQUESTS", "5"),
                ("RATE_LIMIT_WINDOW_MS", "2000"),
                ("RATE_LIMIT_STRATEGY", "fixed_window"),
                ("THROTTLE_FACTOR", "0.9"),
                ("HISTORY_SIZE", "10"),
            ]))
            .unwrap();

        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.quota.rate_limit.max_requests, 5);
        assert_eq!(config.quota.rate_limit.window_ms, 2000);
        assert_eq!(config.quota.rate_limit.strategy, RateLimitStrategy::FixedWindow);
        assert_eq!(config.quota.throttle.factor, 0.9);
        assert_eq!(config.events.max_history_size, 10);
    }

    #[test]
    fn test_env_override_parse_errors() {
        assert!(Config::default().apply_overrides(lookup(&[("LOG_LEVEL", "loud")])).is_err());
        assert!(Config::default()
            .apply_overrides(lookup(&[("RATE_LIMIT_MAX_REQUESTS", "many")]))
            .is_err());
        assert!(Config::default()
            .apply_overrides(lookup(&[("RATE_LIMIT_STRATEGY", "random")]))
            .is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.quota.rate_limit.window_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.events.subscriber_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[quota.rate_limit]"));

        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
