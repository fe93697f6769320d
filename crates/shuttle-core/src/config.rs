//! Runtime configuration for the orchestrator and proxy.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const ENV_MAX_RETRIES: &str = "SHUTTLE_MAX_RETRIES";
pub const ENV_START_TO_CLOSE_SECS: &str = "SHUTTLE_START_TO_CLOSE_SECS";
pub const ENV_RETRY_TIMEOUTS: &str = "SHUTTLE_RETRY_TIMEOUTS";
pub const ENV_TIMEOUT_BACKOFF_BASE_SECS: &str = "SHUTTLE_TIMEOUT_BACKOFF_BASE_SECS";
pub const ENV_TIMEOUT_BACKOFF_MULTIPLIER: &str = "SHUTTLE_TIMEOUT_BACKOFF_MULTIPLIER";
pub const ENV_TIMEOUT_BACKOFF_MAX_SECS: &str = "SHUTTLE_TIMEOUT_BACKOFF_MAX_SECS";
pub const ENV_HEARTBEAT_SECS: &str = "SHUTTLE_HEARTBEAT_SECS";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("start_to_close must be greater than zero")]
    ZeroStartToClose,

    #[error("timeout_backoff_multiplier must be >= 1.0, got {0}")]
    BackoffMultiplier(f64),

    #[error("heartbeat_timeout must be greater than zero when set")]
    ZeroHeartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuttleConfig {
    /// Re-attempts allowed after the first invocation.
    pub max_retries: u32,

    /// Default start-to-close budget per activity call.
    pub start_to_close: Duration,

    /// Retry `RequestTimeout` failures instead of ending in `TimedOut`.
    pub retry_timeouts: bool,

    /// Backoff for retried timeouts: `base * multiplier^(attempts - 1)`.
    pub timeout_backoff_base: Duration,
    pub timeout_backoff_multiplier: f64,

    /// Upper bound on a single backoff delay.
    pub timeout_backoff_max: Duration,

    /// Default heartbeat budget. `None` disables heartbeat checks for calls
    /// that do not set their own.
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for ShuttleConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            start_to_close: Duration::from_secs(5 * 60),
            retry_timeouts: false,
            timeout_backoff_base: Duration::from_secs(2),
            timeout_backoff_multiplier: 2.0,
            timeout_backoff_max: Duration::from_secs(5 * 60),
            heartbeat_timeout: None,
        }
    }
}

impl ShuttleConfig {
    /// Defaults overlaid with `SHUTTLE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a pluggable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_MAX_RETRIES) {
            config.max_retries = parse(ENV_MAX_RETRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_START_TO_CLOSE_SECS) {
            config.start_to_close = Duration::from_secs(parse(ENV_START_TO_CLOSE_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_RETRY_TIMEOUTS) {
            config.retry_timeouts = parse_bool(ENV_RETRY_TIMEOUTS, &v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_BACKOFF_BASE_SECS) {
            config.timeout_backoff_base =
                Duration::from_secs(parse(ENV_TIMEOUT_BACKOFF_BASE_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_TIMEOUT_BACKOFF_MULTIPLIER) {
            config.timeout_backoff_multiplier = parse(ENV_TIMEOUT_BACKOFF_MULTIPLIER, &v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_BACKOFF_MAX_SECS) {
            config.timeout_backoff_max =
                Duration::from_secs(parse(ENV_TIMEOUT_BACKOFF_MAX_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_HEARTBEAT_SECS) {
            config.heartbeat_timeout = Some(Duration::from_secs(parse(ENV_HEARTBEAT_SECS, &v)?));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_to_close.is_zero() {
            return Err(ConfigError::ZeroStartToClose);
        }
        let m = self.timeout_backoff_multiplier;
        if m.is_nan() || m < 1.0 {
            return Err(ConfigError::BackoffMultiplier(self.timeout_backoff_multiplier));
        }
        if self.heartbeat_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::ZeroHeartbeat);
        }
        Ok(())
    }
}

fn parse<V: std::str::FromStr>(key: &'static str, raw: &str) -> Result<V, ConfigError>
where
    V::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: V::Err| ConfigError::InvalidValue {
            key,
            message: e.to_string(),
        })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key,
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ShuttleConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.start_to_close, Duration::from_secs(300));
        assert!(!config.retry_timeouts);
        assert_eq!(config.timeout_backoff_max, Duration::from_secs(300));
        assert_eq!(config.heartbeat_timeout, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_defaults() {
        let config = ShuttleConfig::from_lookup(lookup(&[
            (ENV_MAX_RETRIES, "5"),
            (ENV_START_TO_CLOSE_SECS, "600"),
            (ENV_RETRY_TIMEOUTS, "yes"),
            (ENV_TIMEOUT_BACKOFF_BASE_SECS, "1"),
            (ENV_TIMEOUT_BACKOFF_MULTIPLIER, "3.0"),
            (ENV_TIMEOUT_BACKOFF_MAX_SECS, "60"),
            (ENV_HEARTBEAT_SECS, "30"),
        ]))
        .unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.start_to_close, Duration::from_secs(600));
        assert!(config.retry_timeouts);
        assert_eq!(config.timeout_backoff_base, Duration::from_secs(1));
        assert_eq!(config.timeout_backoff_multiplier, 3.0);
        assert_eq!(config.timeout_backoff_max, Duration::from_secs(60));
        assert_eq!(config.heartbeat_timeout, Some(Duration::from_secs(30)));
    }

    #[rstest]
    #[case::not_a_number(ENV_MAX_RETRIES, "lots")]
    #[case::negative(ENV_MAX_RETRIES, "-1")]
    #[case::bad_bool(ENV_RETRY_TIMEOUTS, "maybe")]
    fn unparsable_values_are_rejected(#[case] key: &'static str, #[case] value: &str) {
        let err = ShuttleConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: k, .. } if k == key));
    }

    #[test]
    fn zero_start_to_close_is_rejected() {
        let err = ShuttleConfig::from_lookup(lookup(&[(ENV_START_TO_CLOSE_SECS, "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroStartToClose);
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let err = ShuttleConfig::from_lookup(lookup(&[(ENV_TIMEOUT_BACKOFF_MULTIPLIER, "0.5")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::BackoffMultiplier(0.5));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let err = ShuttleConfig::from_lookup(lookup(&[(ENV_HEARTBEAT_SECS, "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroHeartbeat);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ShuttleConfig = serde_json::from_str(r#"{"max_retries": 1}"#).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.start_to_close, Duration::from_secs(300));
    }
}
