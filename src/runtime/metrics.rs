// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus-compatible metrics for service invocations.
//!
//! The collector is fed by [`ResiliencePolicy`](crate::runtime::ResiliencePolicy)
//! and exposes:
//!
//! - Call counters per operation, target and outcome
//! - Call duration histograms
//! - Per-target circuit breaker state gauges and rejection counters
//! - Per-target retry counters
//!
//! # Example
//!
//! ```rust
//! use mesh_framework_rs::runtime::{CallOutcome, MetricsCollector, MetricsConfig};
//! use std::time::Duration;
//!
//! let metrics = MetricsCollector::new(MetricsConfig::builder().namespace("mesh").build());
//! metrics.record_call("invoke", "bookings", CallOutcome::Success, Duration::from_millis(42));
//!
//! assert!(metrics.to_prometheus_text().contains("mesh_calls_total"));
//! ```

use crate::runtime::CircuitState;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Configuration for the metrics collector.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Metric namespace prefix (e.g., "mesh" -> "mesh_calls_total")
    pub namespace: String,
    /// Include the target service or bus as a label
    pub target_label: bool,
    /// Include the operation (invoke, publish) as a label
    pub operation_label: bool,
    /// Histogram buckets for call duration (in seconds)
    pub histogram_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "mesh_client".to_string(),
            target_label: true,
            operation_label: true,
            histogram_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

impl MetricsConfig {
    pub fn builder() -> MetricsConfigBuilder {
        MetricsConfigBuilder::default()
    }
}

/// Builder for `MetricsConfig`.
#[derive(Debug, Default)]
pub struct MetricsConfigBuilder {
    namespace: Option<String>,
    target_label: Option<bool>,
    operation_label: Option<bool>,
    histogram_buckets: Option<Vec<f64>>,
}

impl MetricsConfigBuilder {
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn target_label(mut self, enabled: bool) -> Self {
        self.target_label = Some(enabled);
        self
    }

    pub fn operation_label(mut self, enabled: bool) -> Self {
        self.operation_label = Some(enabled);
        self
    }

    pub fn histogram_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.histogram_buckets = Some(buckets);
        self
    }

    pub fn build(self) -> MetricsConfig {
        let default = MetricsConfig::default();
        MetricsConfig {
            namespace: self.namespace.unwrap_or(default.namespace),
            target_label: self.target_label.unwrap_or(default.target_label),
            operation_label: self.operation_label.unwrap_or(default.operation_label),
            histogram_buckets: self.histogram_buckets.unwrap_or(default.histogram_buckets),
        }
    }
}

/// How a call through the façade ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    Success,
    Failure,
    Rejected,
    Cancelled,
}

impl CallOutcome {
    fn as_label(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "error",
            CallOutcome::Rejected => "rejected",
            CallOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Labels {
    operation: Option<String>,
    target: Option<String>,
    outcome: CallOutcome,
}

#[derive(Debug)]
struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum: AtomicU64, // nanoseconds
    count: AtomicU64,
}

impl Histogram {
    fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value_secs: f64) {
        // Cumulative buckets; values above the last bucket only land in +Inf.
        if let Some(first) = self.buckets.iter().position(|b| value_secs <= *b) {
            for counter in &self.counts[first..] {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum
            .fetch_add((value_secs * 1_000_000_000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn sum_secs(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1_000_000_000.0
    }

    fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

type HistogramKey = (Option<String>, Option<String>);

/// Thread-safe metrics collector for façade calls.
#[derive(Debug)]
pub struct MetricsCollector {
    config: MetricsConfig,
    calls_total: RwLock<HashMap<Labels, AtomicU64>>,
    call_duration: RwLock<HashMap<HistogramKey, Histogram>>,
    circuit_state: RwLock<HashMap<String, CircuitState>>,
    circuit_rejections: RwLock<HashMap<String, AtomicU64>>,
    retries: RwLock<HashMap<String, AtomicU64>>,
    start_time: Instant,
}

fn bump(map: &RwLock<HashMap<String, AtomicU64>>, key: &str, by: u64) {
    {
        let counters = map.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(counter) = counters.get(key) {
            counter.fetch_add(by, Ordering::Relaxed);
            return;
        }
    }
    map.write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(by, Ordering::Relaxed);
}

fn read_counter(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) -> u64 {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .map_or(0, |c| c.load(Ordering::Relaxed))
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            calls_total: RwLock::new(HashMap::new()),
            call_duration: RwLock::new(HashMap::new()),
            circuit_state: RwLock::new(HashMap::new()),
            circuit_rejections: RwLock::new(HashMap::new()),
            retries: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MetricsConfig::default())
    }

    /// Record a finished call.
    pub fn record_call(
        &self,
        operation: &str,
        target: &str,
        outcome: CallOutcome,
        duration: Duration,
    ) {
        let operation = self.config.operation_label.then(|| operation.to_string());
        let target = self.config.target_label.then(|| target.to_string());

        let labels = Labels {
            operation: operation.clone(),
            target: target.clone(),
            outcome,
        };
        {
            let counters = self.calls_total.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(counter) = counters.get(&labels) {
                counter.fetch_add(1, Ordering::Relaxed);
            } else {
                drop(counters);
                self.calls_total
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(labels)
                    .or_insert_with(|| AtomicU64::new(0))
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        if outcome == CallOutcome::Rejected {
            // Rejections never reach the target; keep them out of latency.
            return;
        }

        let key = (operation, target);
        let histograms = self.call_duration.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(hist) = histograms.get(&key) {
            hist.observe(duration.as_secs_f64());
        } else {
            drop(histograms);
            self.call_duration
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key)
                .or_insert_with(|| Histogram::new(self.config.histogram_buckets.clone()))
                .observe(duration.as_secs_f64());
        }
    }

    /// Update the circuit state gauge for `target`.
    pub fn set_circuit_state(&self, target: &str, state: CircuitState) {
        self.circuit_state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.to_string(), state);
    }

    /// Record a call rejected by an open circuit.
    pub fn record_circuit_rejection(&self, target: &str) {
        bump(&self.circuit_rejections, target, 1);
    }

    /// Record retries performed for one call.
    pub fn record_retries(&self, target: &str, retries: u32) {
        if retries > 0 {
            bump(&self.retries, target, u64::from(retries));
        }
    }

    fn count_where(&self, pred: impl Fn(&Labels) -> bool) -> u64 {
        self.calls_total
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(labels, _)| pred(labels))
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    pub fn total_calls(&self) -> u64 {
        self.count_where(|_| true)
    }

    pub fn successful_calls(&self) -> u64 {
        self.count_where(|l| l.outcome == CallOutcome::Success)
    }

    pub fn failed_calls(&self) -> u64 {
        self.count_where(|l| l.outcome == CallOutcome::Failure)
    }

    pub fn cancelled_calls(&self) -> u64 {
        self.count_where(|l| l.outcome == CallOutcome::Cancelled)
    }

    /// Last reported circuit state for `target`.
    pub fn circuit_state(&self, target: &str) -> Option<CircuitState> {
        self.circuit_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .copied()
    }

    pub fn circuit_rejections(&self, target: &str) -> u64 {
        read_counter(&self.circuit_rejections, target)
    }

    pub fn retries(&self, target: &str) -> u64 {
        read_counter(&self.retries, target)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus_text(&self) -> String {
        let mut output = String::new();
        let ns = &self.config.namespace;

        output.push_str(&format!("# HELP {ns}_calls_total Total number of calls\n"));
        output.push_str(&format!("# TYPE {ns}_calls_total counter\n"));
        {
            let counters = self.calls_total.read().unwrap_or_else(PoisonError::into_inner);
            for (labels, count) in counters.iter() {
                let mut parts = Vec::new();
                if let Some(ref operation) = labels.operation {
                    parts.push(format!("operation=\"{operation}\""));
                }
                if let Some(ref target) = labels.target {
                    parts.push(format!("target=\"{target}\""));
                }
                parts.push(format!("outcome=\"{}\"", labels.outcome));
                output.push_str(&format!(
                    "{ns}_calls_total{{{}}} {}\n",
                    parts.join(","),
                    count.load(Ordering::Relaxed)
                ));
            }
        }
        output.push('\n');

        output.push_str(&format!(
            "# HELP {ns}_call_duration_seconds Call duration in seconds\n"
        ));
        output.push_str(&format!("# TYPE {ns}_call_duration_seconds histogram\n"));
        {
            let histograms = self.call_duration.read().unwrap_or_else(PoisonError::into_inner);
            for ((operation, target), hist) in histograms.iter() {
                let base = match (operation, target) {
                    (Some(o), Some(t)) => format!("operation=\"{o}\",target=\"{t}\","),
                    (Some(o), None) => format!("operation=\"{o}\","),
                    (None, Some(t)) => format!("target=\"{t}\","),
                    (None, None) => String::new(),
                };
                let plain = base.trim_end_matches(',');

                for (bucket, count) in hist.buckets.iter().zip(&hist.counts) {
                    output.push_str(&format!(
                        "{ns}_call_duration_seconds_bucket{{{base}le=\"{bucket}\"}} {}\n",
                        count.load(Ordering::Relaxed)
                    ));
                }
                let total = hist.total_count();
                output.push_str(&format!(
                    "{ns}_call_duration_seconds_bucket{{{base}le=\"+Inf\"}} {total}\n"
                ));
                if plain.is_empty() {
                    output.push_str(&format!(
                        "{ns}_call_duration_seconds_sum {}\n",
                        hist.sum_secs()
                    ));
                    output.push_str(&format!("{ns}_call_duration_seconds_count {total}\n"));
                } else {
                    output.push_str(&format!(
                        "{ns}_call_duration_seconds_sum{{{plain}}} {}\n",
                        hist.sum_secs()
                    ));
                    output.push_str(&format!(
                        "{ns}_call_duration_seconds_count{{{plain}}} {total}\n"
                    ));
                }
            }
        }
        output.push('\n');

        output.push_str(&format!(
            "# HELP {ns}_circuit_breaker_state Circuit breaker state (0=closed, 1=half-open, 2=open)\n"
        ));
        output.push_str(&format!("# TYPE {ns}_circuit_breaker_state gauge\n"));
        for (target, state) in self
            .circuit_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            output.push_str(&format!(
                "{ns}_circuit_breaker_state{{target=\"{target}\"}} {}\n",
                state.as_gauge()
            ));
        }
        output.push('\n');

        output.push_str(&format!(
            "# HELP {ns}_circuit_breaker_rejections_total Calls rejected by an open circuit\n"
        ));
        output.push_str(&format!(
            "# TYPE {ns}_circuit_breaker_rejections_total counter\n"
        ));
        for (target, count) in self
            .circuit_rejections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            output.push_str(&format!(
                "{ns}_circuit_breaker_rejections_total{{target=\"{target}\"}} {}\n",
                count.load(Ordering::Relaxed)
            ));
        }
        output.push('\n');

        output.push_str(&format!("# HELP {ns}_retries_total Retries after transient faults\n"));
        output.push_str(&format!("# TYPE {ns}_retries_total counter\n"));
        for (target, count) in self
            .retries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            output.push_str(&format!(
                "{ns}_retries_total{{target=\"{target}\"}} {}\n",
                count.load(Ordering::Relaxed)
            ));
        }
        output.push('\n');

        output.push_str(&format!(
            "# HELP {ns}_uptime_seconds Client uptime in seconds\n"
        ));
        output.push_str(&format!("# TYPE {ns}_uptime_seconds gauge\n"));
        output.push_str(&format!(
            "{ns}_uptime_seconds {}\n",
            self.uptime().as_secs_f64()
        ));

        output
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let open_circuits = self
            .circuit_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, state)| **state == CircuitState::Open)
            .map(|(target, _)| target.clone())
            .collect();

        MetricsSnapshot {
            total_calls: self.total_calls(),
            successful_calls: self.successful_calls(),
            failed_calls: self.failed_calls(),
            cancelled_calls: self.cancelled_calls(),
            open_circuits,
            uptime: self.uptime(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Snapshot of current metrics for programmatic access.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub cancelled_calls: u64,
    /// Targets whose circuit was last reported open
    pub open_circuits: Vec<String>,
    pub uptime: Duration,
}
