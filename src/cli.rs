//! Command-line interface for the reqmon demo server
//!
//! Provides argument parsing and subcommand handling for the binary.

use clap::{Parser, Subcommand};

/// Prometheus request instrumentation middleware for Axum
#[derive(Parser)]
#[command(name = "reqmon")]
#[command(version)]
#[command(about = "Prometheus request instrumentation middleware for Axum")]
#[command(
    long_about = "Reqmon instruments inbound HTTP requests: it counts requests, tracks \
    unique visitors through a Bloom filter, measures payload sizes and latency, flags \
    slow requests, and serves the resulting counters on a Prometheus exposition endpoint."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Reqmon Configuration
# ====================
#
# This file configures the demo HTTP server, the request instrumentation
# settings, the unique-visitor filter, and observability.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# REQUEST INSTRUMENTATION
# ─────────────────────────────────────────────────────────────────────────────

[monitor]
# Route serving the Prometheus text exposition
metric_path = "/metrics"

# Paths passed through without any instrumentation (exact match).
# Excluding the metric path keeps scrapes out of the request counters.
exclude_paths = ["/metrics"]

# Requests slower than this many seconds (strictly) count as slow
slow_time_seconds = 5

# Bucket boundaries for the request duration histogram, in seconds
duration_buckets = [0.1, 0.3, 1.2, 5.0, 10.0]

# Static labels appended to every metric. Keys are frozen into lexicographic
# order at startup, so input order is irrelevant.
# [monitor.metadata]
# app = "my_service_1"

# ─────────────────────────────────────────────────────────────────────────────
# UNIQUE-VISITOR FILTER
# ─────────────────────────────────────────────────────────────────────────────
#
# The Bloom filter deduplicating client addresses is sized from these two
# values. Under-provisioning silently under-counts unique visitors.

[filter]
expected_items = 100000
false_positive_rate = 0.01

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // Clap's built-in verification for the CLI structure
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["reqmon"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["reqmon", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn config_subcommand() {
        let cli = Cli::parse_from(["reqmon", "config"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: None })
        ));
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["reqmon", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn template_is_valid_toml() {
        let template = generate_config_template();
        // Should parse without errors
        let result: Result<toml::Value, _> = toml::from_str(template);
        assert!(
            result.is_ok(),
            "Template should be valid TOML: {:?}",
            result.err()
        );
    }

    #[test]
    fn template_parses_and_validates_as_config() {
        let config = crate::config::Config::from_str(generate_config_template())
            .expect("template parses as Config");
        config.validate().expect("template validates");
        assert_eq!(config.monitor.metric_path, "/metrics");
        assert_eq!(config.monitor.exclude_paths, vec!["/metrics".to_string()]);
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        assert!(template.contains("[server]"));
        assert!(template.contains("[monitor]"));
        assert!(template.contains("[filter]"));
        assert!(template.contains("[observability]"));
    }
}
