//! Daemon configuration -- TOML file over full defaults, validated once at
//! startup. Validation failures are fatal: the pipeline refuses to start
//! with undefined semantics rather than run with them.

use crate::classify::Thresholds;
use crate::emit::RetryPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_window_secs() -> u64 {
    60
}
fn default_grace_secs() -> u64 {
    5
}
fn default_idle_close_secs() -> u64 {
    30
}
fn default_close_scan_secs() -> u64 {
    2
}
fn default_abs_error_threshold() -> u64 {
    5
}
fn default_rate_threshold() -> f64 {
    0.10
}
fn default_retry_max_attempts() -> u32 {
    4
}
fn default_retry_base_ms() -> u64 {
    200
}
fn default_retry_max_ms() -> u64 {
    5_000
}
fn default_retrieval_timeout_secs() -> u64 {
    10
}
fn default_retrieval_concurrency() -> usize {
    4
}
fn default_channel_capacity() -> usize {
    1_024
}
fn default_db_path() -> String {
    "data/logwarden.db".to_string()
}
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Tumbling window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Out-of-order arrival allowance: a window closes only once the
    /// watermark has passed its end by this much.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Wall-clock assist for idle streams: the close scan also treats
    /// `now - idle_close_secs` as a watermark. Zero disables the assist
    /// (pure event-time closing).
    #[serde(default = "default_idle_close_secs")]
    pub idle_close_secs: u64,

    /// How often the close scan runs.
    #[serde(default = "default_close_scan_secs")]
    pub close_scan_secs: u64,

    #[serde(default = "default_abs_error_threshold")]
    pub abs_error_threshold: u64,

    #[serde(default = "default_rate_threshold")]
    pub rate_threshold: f64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,

    /// Remediation retrieval endpoint. Absent means retrieval is disabled
    /// and every alert is emitted degraded.
    #[serde(default)]
    pub retrieval_endpoint: Option<String>,

    #[serde(default = "default_retrieval_timeout_secs")]
    pub retrieval_timeout_secs: u64,

    /// Concurrent in-flight emissions (retrieval + publish).
    #[serde(default = "default_retrieval_concurrency")]
    pub retrieval_concurrency: usize,

    /// Bounded capacity of the ingest channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for Config {
    fn default() -> Self {
        // An empty document gives every field its default.
        toml::from_str("").unwrap_or_else(|_| unreachable!("empty config must parse"))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Startup gate. Every rule here guards an invariant the pipeline
    /// depends on; failing any of them is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "window_secs must be positive".to_string(),
            ));
        }
        if self.close_scan_secs == 0 {
            return Err(ConfigError::Invalid(
                "close_scan_secs must be positive".to_string(),
            ));
        }
        if self.abs_error_threshold == 0 {
            return Err(ConfigError::Invalid(
                "abs_error_threshold must be at least 1".to_string(),
            ));
        }
        if !self.rate_threshold.is_finite()
            || self.rate_threshold <= 0.0
            || self.rate_threshold > 1.0
        {
            return Err(ConfigError::Invalid(format!(
                "rate_threshold must be in (0, 1], got {}",
                self.rate_threshold
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_base_delay_ms == 0 || self.retry_max_delay_ms < self.retry_base_delay_ms
        {
            return Err(ConfigError::Invalid(
                "retry delays must satisfy 0 < base <= max".to_string(),
            ));
        }
        if self.retrieval_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "retrieval_timeout_secs must be positive".to_string(),
            ));
        }
        if self.retrieval_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "retrieval_concurrency must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            abs_error_threshold: self.abs_error_threshold,
            rate_threshold: self.rate_threshold,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.window_secs, 60);
        assert_eq!(config.abs_error_threshold, 5);
        assert!((config.rate_threshold - 0.10).abs() < 1e-9);
        assert!(config.retrieval_endpoint.is_none());
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = Config {
            window_secs: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rate_threshold_bounds() {
        for bad in [0.0, -0.1, 1.5, f64::NAN] {
            let config = Config {
                rate_threshold: bad,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "accepted rate {bad}");
        }
        let config = Config {
            rate_threshold: 1.0,
            ..Config::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_inverted_retry_delays_rejected() {
        let config = Config {
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logwarden.toml");
        std::fs::write(
            &path,
            "window_secs = 15\nabs_error_threshold = 3\nretrieval_endpoint = \"http://localhost:5000\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.window_secs, 15);
        assert_eq!(config.abs_error_threshold, 3);
        assert_eq!(
            config.retrieval_endpoint.as_deref(),
            Some("http://localhost:5000")
        );
        // Unspecified fields keep their defaults.
        assert_eq!(config.grace_secs, 5);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logwarden.toml");
        std::fs::write(&path, "window_seconds = 15\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }
}
