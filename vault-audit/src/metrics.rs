//! Metric emission for the audit pipeline
//!
//! Metric names are built from label parts joined with `.`, for example
//! `["audit", "file/", "log_request"]` becomes `audit.file/.log_request`.
//! The [`MetricsSink`] trait keeps the audit core independent of any
//! particular exporter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Well-known metric names emitted by the broker and sink wrappers
pub mod metric_names {
    /// Broker timer for request events
    pub const LOG_REQUEST: &[&str] = &["audit", "log_request"];
    /// Broker timer for response events
    pub const LOG_RESPONSE: &[&str] = &["audit", "log_response"];
    /// Broker failure counter for request events
    pub const LOG_REQUEST_FAILURE: &[&str] = &["audit", "log_request_failure"];
    /// Broker failure counter for response events
    pub const LOG_RESPONSE_FAILURE: &[&str] = &["audit", "log_response_failure"];
    /// Sink success counter
    pub const SINK_SUCCESS: &[&str] = &["audit", "sink", "success"];
    /// Sink failure counter
    pub const SINK_FAILURE: &[&str] = &["audit", "sink", "failure"];
    /// Fallback sink success counter
    pub const FALLBACK_SUCCESS: &[&str] = &["audit", "fallback", "success"];
    /// Fallback sink miss counter
    pub const FALLBACK_MISS: &[&str] = &["audit", "fallback", "miss"];
}

/// Join label parts into a metric name
pub fn metric_key(parts: &[&str]) -> String {
    parts.join(".")
}

/// Destination for audit metrics
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by `value`
    fn incr_counter(&self, key: &[&str], value: f32);

    /// Record a timing sample
    fn add_sample(&self, key: &[&str], elapsed: Duration);

    /// Record the time elapsed since `start`
    fn measure_since(&self, key: &[&str], start: Instant) {
        self.add_sample(key, start.elapsed());
    }
}

/// Shared handle to a metrics sink
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// A sink that drops every metric
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _key: &[&str], _value: f32) {}

    fn add_sample(&self, _key: &[&str], _elapsed: Duration) {}
}

/// Default metrics handle
pub fn noop() -> SharedMetrics {
    Arc::new(NoopMetrics)
}

/// A sink that keeps metrics in memory for inspection
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<String, f64>,
    samples: DashMap<String, Vec<Duration>>,
}

impl InMemoryMetrics {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero when never incremented
    pub fn counter(&self, name: &str) -> f64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0.0)
    }

    /// Whether a counter has been touched at all
    pub fn has_counter(&self, name: &str) -> bool {
        self.counters.contains_key(name)
    }

    /// Number of timing samples recorded under `name`
    pub fn sample_count(&self, name: &str) -> usize {
        self.samples.get(name).map(|v| v.len()).unwrap_or(0)
    }

    /// Names of every metric recorded so far
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .counters
            .iter()
            .map(|e| e.key().clone())
            .chain(self.samples.iter().map(|e| e.key().clone()))
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, key: &[&str], value: f32) {
        *self.counters.entry(metric_key(key)).or_insert(0.0) += f64::from(value);
    }

    fn add_sample(&self, key: &[&str], elapsed: Duration) {
        self.samples.entry(metric_key(key)).or_default().push(elapsed);
    }
}

/// Metrics exported through the OpenTelemetry global meter provider
#[cfg(feature = "observability")]
pub struct OtelMetrics {
    meter: opentelemetry::metrics::Meter,
    counters: DashMap<String, opentelemetry::metrics::Counter<f64>>,
    histograms: DashMap<String, opentelemetry::metrics::Histogram<f64>>,
}

#[cfg(feature = "observability")]
impl OtelMetrics {
    /// Create a sink using the global meter named `vault-audit`
    pub fn new() -> Self {
        Self {
            meter: opentelemetry::global::meter("vault-audit"),
            counters: DashMap::new(),
            histograms: DashMap::new(),
        }
    }
}

#[cfg(feature = "observability")]
impl Default for OtelMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "observability")]
impl MetricsSink for OtelMetrics {
    fn incr_counter(&self, key: &[&str], value: f32) {
        let name = metric_key(key);
        let counter = self
            .counters
            .entry(name.clone())
            .or_insert_with(|| self.meter.f64_counter(name).build())
            .clone();
        counter.add(f64::from(value), &[]);
    }

    fn add_sample(&self, key: &[&str], elapsed: Duration) {
        let name = metric_key(key);
        let histogram = self
            .histograms
            .entry(name.clone())
            .or_insert_with(|| {
                self.meter
                    .f64_histogram(name)
                    .with_unit("ms")
                    .build()
            })
            .clone();
        histogram.record(elapsed.as_secs_f64() * 1000.0, &[]);
    }
}
