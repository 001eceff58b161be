//! Minimal labeled summary primitive
//!
//! The `prometheus` crate implements counters, gauges and histograms but has
//! no Summary type, so the Summary metric kind is backed by this collector
//! instead: each label-value combination owns an observation count, a running
//! sum, and a bounded window of recent observations from which the configured
//! quantile objectives are estimated at exposition time.
//!
//! `Monitor::gather` renders these families in Prometheus text format after
//! the registry's encoded output. This module goes away if upstream ever
//! grows a Summary implementation.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError, RwLock};

/// Observations retained per series for quantile estimation.
const WINDOW_SIZE: usize = 1024;

/// Quantiles reported when the caller configures none.
pub const DEFAULT_OBJECTIVES: &[f64] = &[0.5, 0.9, 0.99];

struct Series {
    count: u64,
    sum: f64,
    window: VecDeque<f64>,
}

impl Series {
    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    /// Nearest-rank quantile over the retained window.
    fn quantile(&self, q: f64) -> f64 {
        if self.window.is_empty() {
            return f64::NAN;
        }
        let mut sorted: Vec<f64> = self.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank]
    }
}

/// Labeled summary family: a thread-safe map from label values to series.
pub struct SummaryVec {
    name: String,
    help: String,
    objectives: Vec<f64>,
    series: RwLock<HashMap<Vec<String>, Mutex<Series>>>,
}

impl SummaryVec {
    /// Build a summary family for the given quantile objectives.
    ///
    /// Objectives are sorted and deduplicated; an empty list falls back to
    /// [`DEFAULT_OBJECTIVES`]. Label arity is enforced by the `Metric`
    /// wrapper, not here.
    pub fn new(name: &str, help: &str, objectives: &[f64]) -> Self {
        let mut objectives: Vec<f64> = if objectives.is_empty() {
            DEFAULT_OBJECTIVES.to_vec()
        } else {
            objectives
                .iter()
                .copied()
                .filter(|q| q.is_finite() && (0.0..=1.0).contains(q))
                .collect()
        };
        objectives.sort_by(f64::total_cmp);
        objectives.dedup();

        Self {
            name: name.to_string(),
            help: help.to_string(),
            objectives,
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Record one observation into the series selected by `label_values`.
    pub fn observe(&self, label_values: &[&str], value: f64) {
        let key: Vec<String> = label_values.iter().map(|v| (*v).to_string()).collect();

        {
            let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(child) = series.get(&key) {
                child
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .observe(value);
                return;
            }
        }

        let mut series = self.series.write().unwrap_or_else(PoisonError::into_inner);
        series
            .entry(key)
            .or_insert_with(|| {
                Mutex::new(Series {
                    count: 0,
                    sum: 0.0,
                    window: VecDeque::with_capacity(WINDOW_SIZE),
                })
            })
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(value);
    }

    /// Total observation count across all series.
    pub fn total_count(&self) -> u64 {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        series
            .values()
            .map(|child| child.lock().unwrap_or_else(PoisonError::into_inner).count)
            .sum()
    }

    /// Render the family in Prometheus text format, given the label names
    /// the owning metric was registered with.
    ///
    /// Families with no series render as an empty string so that an idle
    /// summary leaves the exposition payload untouched.
    pub fn expose(&self, label_names: &[String]) -> String {
        let series = self.series.read().unwrap_or_else(PoisonError::into_inner);
        if series.is_empty() {
            return String::new();
        }

        let mut out = String::new();
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} summary", self.name);

        let mut keys: Vec<&Vec<String>> = series.keys().collect();
        keys.sort();

        for key in keys {
            let child = series[key].lock().unwrap_or_else(PoisonError::into_inner);
            let base_labels = render_labels(label_names, key);

            for &q in &self.objectives {
                let mut labels: Vec<String> = base_labels.clone();
                labels.push(format!("quantile=\"{q}\""));
                let _ = writeln!(out, "{}{{{}}} {}", self.name, labels.join(","), child.quantile(q));
            }
            let suffix = if base_labels.is_empty() {
                String::new()
            } else {
                format!("{{{}}}", base_labels.join(","))
            };
            let _ = writeln!(out, "{}_sum{} {}", self.name, suffix, child.sum);
            let _ = writeln!(out, "{}_count{} {}", self.name, suffix, child.count);
        }
        out
    }
}

fn render_labels(names: &[String], values: &[String]) -> Vec<String> {
    names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{name}=\"{}\"", escape_label_value(value)))
        .collect()
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
