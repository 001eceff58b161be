//! Metric registry and middleware wiring
//!
//! The `Monitor` owns every metric, the unique-visitor filter, and the frozen
//! instrumentation settings. It is constructed once via [`MonitorBuilder`]
//! (configuration is immutable afterwards, so "no reconfiguration after
//! traffic starts" holds by type rather than by documentation) and attached
//! to an Axum router, which installs the tracking middleware and the
//! exposition route.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use axum::Router;
use axum::routing::get;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::config::{self, Config};
use crate::error::{MonitorError, MonitorResult};
use crate::filter::BloomFilter;
use crate::metric::{Metric, MetricKind, MetricSpec};
use crate::middleware;

/// Built-in metric names.
pub const METRIC_REQUEST_TOTAL: &str = "request_total";
pub const METRIC_REQUEST_UV_TOTAL: &str = "request_uv_total";
pub const METRIC_URI_REQUEST_TOTAL: &str = "uri_request_total";
pub const METRIC_REQUEST_BODY_TOTAL: &str = "request_body_total";
pub const METRIC_RESPONSE_BODY_TOTAL: &str = "response_body_total";
pub const METRIC_REQUEST_DURATION: &str = "request_duration";
pub const METRIC_SLOW_REQUEST_TOTAL: &str = "slow_request_total";

static GLOBAL: OnceLock<Arc<Monitor>> = OnceLock::new();

/// Request instrumentation registry.
///
/// Owns all metrics and the membership filter; the middleware holds only an
/// `Arc` reference and no independent state.
pub struct Monitor {
    slow_time: u64,
    metric_path: String,
    exclude_paths: HashSet<String>,
    duration_buckets: Vec<f64>,
    /// Metadata frozen into lexicographic key order at construction. The same
    /// order is used for every label-name list and every emitted value list,
    /// so label positions never drift between registration and emission.
    metadata: Vec<(String, String)>,
    metrics: RwLock<HashMap<String, Arc<Metric>>>,
    registry: Registry,
    filter: BloomFilter,
}

impl Monitor {
    pub fn builder() -> MonitorBuilder {
        MonitorBuilder::default()
    }

    /// Process-wide monitor, created on first call and returned unchanged on
    /// every later one. The builder of subsequent callers is ignored; this is
    /// an idempotent init, not an error.
    ///
    /// Embedders and tests that want isolated registries should build their
    /// own instance with [`MonitorBuilder::build`] instead.
    pub fn global(builder: MonitorBuilder) -> Arc<Monitor> {
        GLOBAL.get_or_init(|| Arc::new(builder.build())).clone()
    }

    /// Slow-request threshold in seconds.
    pub fn slow_time(&self) -> u64 {
        self.slow_time
    }

    /// Route serving the Prometheus exposition.
    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    /// Whether a request path is passed through without instrumentation.
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths.contains(path)
    }

    /// Strictly-greater comparison against the slow threshold: a request
    /// taking exactly the threshold is not slow.
    pub fn is_slow(&self, elapsed_seconds: f64) -> bool {
        elapsed_seconds > self.slow_time as f64
    }

    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// Register a metric under its (unique, non-empty) name, building the
    /// underlying primitive and adding it to the exposition registry.
    pub fn add_metric(&self, spec: MetricSpec) -> MonitorResult<()> {
        if spec.name.is_empty() {
            return Err(MonitorError::InvalidName);
        }

        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        if metrics.contains_key(&spec.name) {
            return Err(MonitorError::AlreadyExists(spec.name));
        }

        let metric = Metric::from_spec(&spec)?;
        if let Some(collector) = metric.collector() {
            self.registry.register(collector)?;
        }
        metrics.insert(spec.name, Arc::new(metric));
        Ok(())
    }

    /// Look up a registered metric by name.
    pub fn get_metric(&self, name: &str) -> MonitorResult<Arc<Metric>> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| MonitorError::NotFound(name.to_string()))
    }

    /// Register the built-in metrics, install the tracking middleware, and
    /// mount the exposition route. One-time: attaching the same monitor twice
    /// fails on the duplicate built-ins.
    pub fn attach(self: &Arc<Self>, router: Router) -> MonitorResult<Router> {
        self.register_builtins()?;

        Ok(router
            .route(
                &self.metric_path,
                get(middleware::exposition).with_state(Arc::clone(self)),
            )
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(self),
                middleware::track,
            )))
    }

    /// Encode every metric in Prometheus text format: the engine registry
    /// first, then the summary families the engine cannot represent.
    pub fn gather(&self) -> MonitorResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        let mut output = String::from_utf8(buffer).map_err(|e| {
            MonitorError::Prometheus(prometheus::Error::Msg(format!(
                "metrics encoder produced invalid UTF-8: {e}"
            )))
        })?;

        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        let mut summaries: Vec<&Arc<Metric>> = metrics
            .values()
            .filter(|metric| metric.kind() == MetricKind::Summary)
            .collect();
        summaries.sort_by(|a, b| a.name().cmp(b.name()));
        for summary in summaries {
            if let Some(text) = summary.expose_text() {
                output.push_str(&text);
            }
        }
        Ok(output)
    }

    /// Base label values extended with the frozen metadata values, in the
    /// exact order used at registration.
    pub(crate) fn metric_values(&self, base: &[&str]) -> Vec<String> {
        let mut values: Vec<String> = base.iter().map(|v| (*v).to_string()).collect();
        values.extend(self.metadata.iter().map(|(_, v)| v.clone()));
        values
    }

    /// Base label names extended with the frozen metadata keys.
    fn labels_for(&self, base: &[&str]) -> Vec<String> {
        let mut labels: Vec<String> = base.iter().map(|l| (*l).to_string()).collect();
        labels.extend(self.metadata.iter().map(|(k, _)| k.clone()));
        labels
    }

    fn register_builtins(&self) -> MonitorResult<()> {
        self.add_metric(MetricSpec::counter(
            METRIC_REQUEST_TOTAL,
            "Total number of HTTP requests made.",
            self.labels_for(&[]),
        ))?;
        self.add_metric(MetricSpec::counter(
            METRIC_REQUEST_UV_TOTAL,
            "Total number of unique visitors.",
            self.labels_for(&[]),
        ))?;
        self.add_metric(MetricSpec::counter(
            METRIC_URI_REQUEST_TOTAL,
            "Total number of HTTP requests per route.",
            self.labels_for(&["uri", "method", "code"]),
        ))?;
        self.add_metric(MetricSpec::counter(
            METRIC_REQUEST_BODY_TOTAL,
            "Total bytes of HTTP request bodies received.",
            self.labels_for(&["uri", "method", "code"]),
        ))?;
        self.add_metric(MetricSpec::counter(
            METRIC_RESPONSE_BODY_TOTAL,
            "Total bytes of HTTP response bodies sent.",
            self.labels_for(&[]),
        ))?;
        self.add_metric(MetricSpec::histogram(
            METRIC_REQUEST_DURATION,
            "The HTTP request latencies in seconds.",
            self.labels_for(&["uri"]),
            self.duration_buckets.clone(),
        ))?;
        self.add_metric(MetricSpec::counter(
            METRIC_SLOW_REQUEST_TOTAL,
            "Total number of slow HTTP requests made.",
            self.labels_for(&["uri", "method", "code"]),
        ))?;
        Ok(())
    }
}

/// Collects instrumentation settings and freezes them into a [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorBuilder {
    slow_time: u64,
    metric_path: String,
    exclude_paths: HashSet<String>,
    duration_buckets: Vec<f64>,
    metadata: BTreeMap<String, String>,
    filter_expected_items: usize,
    filter_false_positive_rate: f64,
}

impl Default for MonitorBuilder {
    fn default() -> Self {
        Self {
            slow_time: 5,
            metric_path: "/metrics".to_string(),
            exclude_paths: HashSet::new(),
            duration_buckets: config::default_duration_buckets(),
            metadata: BTreeMap::new(),
            filter_expected_items: crate::filter::DEFAULT_EXPECTED_ITEMS,
            filter_false_positive_rate: crate::filter::DEFAULT_FALSE_POSITIVE_RATE,
        }
    }
}

impl MonitorBuilder {
    pub fn from_config(config: &Config) -> Self {
        Self {
            slow_time: config.monitor.slow_time_seconds,
            metric_path: config.monitor.metric_path.clone(),
            exclude_paths: config.monitor.exclude_paths.iter().cloned().collect(),
            duration_buckets: config.monitor.duration_buckets.clone(),
            metadata: config.monitor.metadata.clone(),
            filter_expected_items: config.filter.expected_items,
            filter_false_positive_rate: config.filter.false_positive_rate,
        }
    }

    /// Slow-request threshold in seconds.
    pub fn slow_time(mut self, seconds: u64) -> Self {
        self.slow_time = seconds;
        self
    }

    pub fn metric_path(mut self, path: &str) -> Self {
        self.metric_path = path.to_string();
        self
    }

    pub fn exclude_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn duration_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.duration_buckets = buckets;
        self
    }

    /// Static labels appended to every metric. Input order is irrelevant:
    /// keys are frozen into lexicographic order at build time.
    pub fn metadata<I, K, V>(mut self, metadata: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.metadata = metadata
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn filter_capacity(mut self, expected_items: usize, false_positive_rate: f64) -> Self {
        self.filter_expected_items = expected_items;
        self.filter_false_positive_rate = false_positive_rate;
        self
    }

    pub fn build(self) -> Monitor {
        Monitor {
            slow_time: self.slow_time,
            metric_path: self.metric_path,
            exclude_paths: self.exclude_paths,
            duration_buckets: self.duration_buckets,
            // BTreeMap iteration order is the frozen lexicographic order.
            metadata: self.metadata.into_iter().collect(),
            metrics: RwLock::new(HashMap::new()),
            registry: Registry::new(),
            filter: BloomFilter::new(
                self.filter_expected_items,
                self.filter_false_positive_rate,
            ),
        }
    }
}
