//! Typed metric wrapper over one aggregation primitive
//!
//! A `Metric` pairs a kind tag with the matching collector from the metrics
//! engine and exposes kind-checked update operations. Dispatch is a closed
//! enum over the four aggregation kinds, so there are no runtime downcasts:
//! a counter physically cannot receive an `observe`.

use prometheus::core::Collector;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts};

use crate::error::{MonitorError, MonitorResult};
use crate::summary::SummaryVec;

/// Aggregation kind of a metric.
///
/// `Unset` is the kind of a default-constructed spec that never chose an
/// aggregation; building or updating such a metric fails with
/// [`MonitorError::NotRegistered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    #[default]
    Unset,
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Unset => "unset",
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction input for a metric: kind, identity, label names, and the
/// kind-specific extras (histogram buckets, summary quantile objectives).
#[derive(Debug, Clone, Default)]
pub struct MetricSpec {
    pub kind: MetricKind,
    pub name: String,
    pub help: String,
    pub labels: Vec<String>,
    pub buckets: Vec<f64>,
    pub objectives: Vec<f64>,
}

impl MetricSpec {
    pub fn counter(name: &str, help: &str, labels: Vec<String>) -> Self {
        Self {
            kind: MetricKind::Counter,
            name: name.to_string(),
            help: help.to_string(),
            labels,
            ..Self::default()
        }
    }

    pub fn gauge(name: &str, help: &str, labels: Vec<String>) -> Self {
        Self {
            kind: MetricKind::Gauge,
            name: name.to_string(),
            help: help.to_string(),
            labels,
            ..Self::default()
        }
    }

    pub fn histogram(name: &str, help: &str, labels: Vec<String>, buckets: Vec<f64>) -> Self {
        Self {
            kind: MetricKind::Histogram,
            name: name.to_string(),
            help: help.to_string(),
            labels,
            buckets,
            ..Self::default()
        }
    }

    pub fn summary(name: &str, help: &str, labels: Vec<String>, objectives: Vec<f64>) -> Self {
        Self {
            kind: MetricKind::Summary,
            name: name.to_string(),
            help: help.to_string(),
            labels,
            objectives,
            ..Self::default()
        }
    }
}

/// Closed dispatch over the engine's aggregation primitives.
enum MetricVec {
    Counter(CounterVec),
    Gauge(GaugeVec),
    Histogram(HistogramVec),
    Summary(SummaryVec),
}

/// One registered metric: immutable kind, name and label arity, plus the
/// underlying thread-safe collector.
pub struct Metric {
    kind: MetricKind,
    name: String,
    labels: Vec<String>,
    vec: MetricVec,
}

impl Metric {
    /// Build the underlying primitive for a spec. This is the kind →
    /// constructor dispatch: counters and gauges take name/help/labels,
    /// histograms additionally take bucket boundaries, summaries quantile
    /// objectives.
    pub(crate) fn from_spec(spec: &MetricSpec) -> MonitorResult<Self> {
        let label_refs: Vec<&str> = spec.labels.iter().map(String::as_str).collect();
        let vec = match spec.kind {
            MetricKind::Counter => MetricVec::Counter(CounterVec::new(
                Opts::new(spec.name.clone(), spec.help.clone()),
                &label_refs,
            )?),
            MetricKind::Gauge => MetricVec::Gauge(GaugeVec::new(
                Opts::new(spec.name.clone(), spec.help.clone()),
                &label_refs,
            )?),
            MetricKind::Histogram => {
                let buckets = if spec.buckets.is_empty() {
                    prometheus::DEFAULT_BUCKETS.to_vec()
                } else {
                    spec.buckets.clone()
                };
                MetricVec::Histogram(HistogramVec::new(
                    HistogramOpts::new(spec.name.clone(), spec.help.clone()).buckets(buckets),
                    &label_refs,
                )?)
            }
            MetricKind::Summary => {
                MetricVec::Summary(SummaryVec::new(&spec.name, &spec.help, &spec.objectives))
            }
            MetricKind::Unset => return Err(MonitorError::NotRegistered(spec.name.clone())),
        };

        Ok(Self {
            kind: spec.kind,
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            vec,
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Increment the series selected by `label_values` by 1.
    ///
    /// Valid for counters and gauges only.
    pub fn inc(&self, label_values: &[&str]) -> MonitorResult<()> {
        self.check_arity(label_values)?;
        match &self.vec {
            MetricVec::Counter(vec) => {
                vec.with_label_values(label_values).inc();
                Ok(())
            }
            MetricVec::Gauge(vec) => {
                vec.with_label_values(label_values).inc();
                Ok(())
            }
            _ => Err(self.kind_mismatch("inc")),
        }
    }

    /// Add `value` to the series selected by `label_values`.
    ///
    /// Valid for counters (non-negative values) and gauges.
    pub fn add(&self, label_values: &[&str], value: f64) -> MonitorResult<()> {
        self.check_arity(label_values)?;
        check_finite(value)?;
        match &self.vec {
            MetricVec::Counter(vec) => {
                if value < 0.0 {
                    return Err(MonitorError::Prometheus(prometheus::Error::Msg(format!(
                        "counter '{}' cannot be decremented by {value}",
                        self.name
                    ))));
                }
                vec.with_label_values(label_values).inc_by(value);
                Ok(())
            }
            MetricVec::Gauge(vec) => {
                vec.with_label_values(label_values).add(value);
                Ok(())
            }
            _ => Err(self.kind_mismatch("add")),
        }
    }

    /// Record one observation of `value` into the series selected by
    /// `label_values`.
    ///
    /// Valid for histograms and summaries only.
    pub fn observe(&self, label_values: &[&str], value: f64) -> MonitorResult<()> {
        self.check_arity(label_values)?;
        check_finite(value)?;
        match &self.vec {
            MetricVec::Histogram(vec) => {
                vec.with_label_values(label_values).observe(value);
                Ok(())
            }
            MetricVec::Summary(vec) => {
                vec.observe(label_values, value);
                Ok(())
            }
            _ => Err(self.kind_mismatch("observe")),
        }
    }

    /// The engine collector to register for exposition, if the primitive is
    /// one of the engine's own. Summaries are rendered separately by the
    /// monitor's gather step.
    pub(crate) fn collector(&self) -> Option<Box<dyn Collector>> {
        match &self.vec {
            MetricVec::Counter(vec) => Some(Box::new(vec.clone())),
            MetricVec::Gauge(vec) => Some(Box::new(vec.clone())),
            MetricVec::Histogram(vec) => Some(Box::new(vec.clone())),
            MetricVec::Summary(_) => None,
        }
    }

    /// Text exposition for summary metrics, `None` for everything else.
    pub(crate) fn expose_text(&self) -> Option<String> {
        match &self.vec {
            MetricVec::Summary(vec) => Some(vec.expose(&self.labels)),
            _ => None,
        }
    }

    fn check_arity(&self, label_values: &[&str]) -> MonitorResult<()> {
        if self.kind == MetricKind::Unset {
            return Err(MonitorError::NotRegistered(self.name.clone()));
        }
        if label_values.len() != self.labels.len() {
            return Err(MonitorError::LabelArityMismatch {
                name: self.name.clone(),
                expected: self.labels.len(),
                got: label_values.len(),
            });
        }
        Ok(())
    }

    fn kind_mismatch(&self, op: &'static str) -> MonitorError {
        MonitorError::KindMismatch {
            name: self.name.clone(),
            kind: self.kind,
            op,
        }
    }
}

/// NaN and infinity corrupt aggregate statistics; reject them before they
/// reach the engine.
fn check_finite(value: f64) -> MonitorResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MonitorError::Prometheus(prometheus::Error::Msg(format!(
            "metric value must be finite, got {value}"
        ))))
    }
}
