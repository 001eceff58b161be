//! Error types for reqmon
//!
//! Registry and metric errors are local and non-fatal: callers log them and
//! request processing continues. No error originating from request handling
//! may terminate the serving process.

use crate::metric::MetricKind;
use thiserror::Error;

/// Main error type for the monitor and its metrics
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("metric '{0}' already exists")]
    AlreadyExists(String),

    #[error("metric name cannot be empty")]
    InvalidName,

    #[error("metric '{0}' not found")]
    NotFound(String),

    #[error("metric '{0}' has no registered kind")]
    NotRegistered(String),

    #[error("metric '{name}' is a {kind}, '{op}' is not supported")]
    KindMismatch {
        name: String,
        kind: MetricKind,
        op: &'static str,
    },

    #[error("metric '{name}' expects {expected} label values, got {got}")]
    LabelArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// Convenience type alias for Results
pub type MonitorResult<T> = Result<T, MonitorError>;
