//! Configuration management for reqmon
//!
//! Parses TOML configuration files and provides typed access to settings.
//! All monitor settings are consumed once at startup when the `Monitor` is
//! built; there is no reconfiguration after traffic starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{MonitorError, MonitorResult};
use crate::filter;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// Request instrumentation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Route serving the Prometheus text exposition.
    #[serde(default = "default_metric_path")]
    pub metric_path: String,
    /// Paths passed through with zero metric side effects (exact match).
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    /// Requests slower than this many seconds (strictly) count as slow.
    #[serde(default = "default_slow_time")]
    pub slow_time_seconds: u64,
    /// Bucket boundaries for the request duration histogram, in seconds.
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,
    /// Static labels appended to every metric. Keys are frozen into
    /// lexicographic order when the monitor is built.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            metric_path: default_metric_path(),
            exclude_paths: Vec::new(),
            slow_time_seconds: default_slow_time(),
            duration_buckets: default_duration_buckets(),
            metadata: BTreeMap::new(),
        }
    }
}

fn default_metric_path() -> String {
    "/metrics".to_string()
}

fn default_slow_time() -> u64 {
    5
}

pub(crate) fn default_duration_buckets() -> Vec<f64> {
    vec![0.1, 0.3, 1.2, 5.0, 10.0]
}

/// Unique-visitor filter sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterConfig {
    #[serde(default = "default_expected_items")]
    pub expected_items: usize,
    #[serde(default = "default_false_positive_rate")]
    pub false_positive_rate: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_items: default_expected_items(),
            false_positive_rate: default_false_positive_rate(),
        }
    }
}

fn default_expected_items() -> usize {
    filter::DEFAULT_EXPECTED_ITEMS
}

fn default_false_positive_rate() -> f64 {
    filter::DEFAULT_FALSE_POSITIVE_RATE
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load and parse a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            MonitorError::Config(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> MonitorResult<Self> {
        toml::from_str(contents).map_err(|e| MonitorError::Config(e.to_string()))
    }

    /// Validate cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> MonitorResult<()> {
        if self.server.host.parse::<std::net::IpAddr>().is_err() {
            return Err(MonitorError::Config(format!(
                "server.host must be a valid IP address, got '{}'",
                self.server.host
            )));
        }
        if !self.monitor.metric_path.starts_with('/') {
            return Err(MonitorError::Config(format!(
                "metric_path must start with '/', got '{}'",
                self.monitor.metric_path
            )));
        }
        for path in &self.monitor.exclude_paths {
            if !path.starts_with('/') {
                return Err(MonitorError::Config(format!(
                    "exclude path must start with '/', got '{path}'"
                )));
            }
        }
        if self.monitor.duration_buckets.is_empty() {
            return Err(MonitorError::Config(
                "duration_buckets must not be empty".to_string(),
            ));
        }
        let buckets = &self.monitor.duration_buckets;
        for window in buckets.windows(2) {
            if window[0] >= window[1] {
                return Err(MonitorError::Config(format!(
                    "duration_buckets must be strictly ascending, got {buckets:?}"
                )));
            }
        }
        if buckets[0] <= 0.0 || !buckets.iter().all(|b| b.is_finite()) {
            return Err(MonitorError::Config(format!(
                "duration_buckets must be positive finite values, got {buckets:?}"
            )));
        }
        if self.filter.expected_items == 0 {
            return Err(MonitorError::Config(
                "filter.expected_items must be greater than zero".to_string(),
            ));
        }
        let rate = self.filter.false_positive_rate;
        if !(rate.is_finite() && 0.0 < rate && rate < 1.0) {
            return Err(MonitorError::Config(format!(
                "filter.false_positive_rate must be in (0, 1), got {rate}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.monitor.metric_path, "/metrics");
        assert_eq!(config.monitor.slow_time_seconds, 5);
        assert_eq!(config.monitor.duration_buckets, vec![0.1, 0.3, 1.2, 5.0, 10.0]);
        assert!(config.monitor.exclude_paths.is_empty());
        assert!(config.monitor.metadata.is_empty());
        assert_eq!(config.filter.expected_items, 100_000);
        assert_eq!(config.filter.false_positive_rate, 0.01);
        config.validate().expect("defaults validate");
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [monitor]
            metric_path = "/internal/metrics"
            exclude_paths = ["/internal/metrics", "/health"]
            slow_time_seconds = 10
            duration_buckets = [0.05, 0.5, 2.0]

            [monitor.metadata]
            app = "my_service_1"
            zone = "eu-west"

            [filter]
            expected_items = 50000
            false_positive_rate = 0.001

            [observability]
            log_level = "debug"
            "#,
        )
        .expect("config parses");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.monitor.metric_path, "/internal/metrics");
        assert_eq!(config.monitor.exclude_paths.len(), 2);
        assert_eq!(config.monitor.slow_time_seconds, 10);
        assert_eq!(config.monitor.metadata["app"], "my_service_1");
        assert_eq!(config.filter.expected_items, 50_000);
        assert_eq!(config.observability.log_level, "debug");
        config.validate().expect("full config validates");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_str("").expect("empty config parses");
        assert_eq!(config.monitor.metric_path, "/metrics");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = Config::from_str("[monitor\nmetric_path = 1").unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_unparseable_host() {
        let mut config = Config::default();
        config.server.host = "localghost".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("valid IP address"));

        let mut config = Config::default();
        config.server.host = "::1".to_string();
        config.validate().expect("IPv6 literal is a valid host");
    }

    #[test]
    fn test_validate_rejects_relative_metric_path() {
        let mut config = Config::default();
        config.monitor.metric_path = "metrics".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsorted_buckets() {
        let mut config = Config::default();
        config.monitor.duration_buckets = vec![1.0, 0.5, 2.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nonpositive_bucket() {
        let mut config = Config::default();
        config.monitor.duration_buckets = vec![0.0, 1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_filter_settings() {
        let mut config = Config::default();
        config.filter.expected_items = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.filter.false_positive_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            "[monitor]\nslow_time_seconds = 7\nexclude_paths = [\"/metrics\"]\n"
        )
        .expect("write config");

        let config = Config::from_file(file.path()).expect("config loads");
        assert_eq!(config.monitor.slow_time_seconds, 7);
        assert_eq!(config.monitor.exclude_paths, vec!["/metrics".to_string()]);
    }

    #[test]
    fn test_from_file_missing_path() {
        let err = Config::from_file("/nonexistent/reqmon.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
