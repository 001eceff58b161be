//! Reqmon - Prometheus request instrumentation middleware for Axum
//!
//! This library instruments inbound HTTP requests: total and per-route
//! counters, unique-visitor tracking through a Bloom filter, payload sizes,
//! latency histograms, slow-request flagging, and a pull-based exposition
//! endpoint.

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod metric;
pub mod middleware;
pub mod monitor;
pub mod summary;
pub mod telemetry;

pub use error::{MonitorError, MonitorResult};
pub use metric::{Metric, MetricKind, MetricSpec};
pub use monitor::{Monitor, MonitorBuilder};
