//! In-memory metrics recorder and JSON summary.
//!
//! [`InMemoryRecorder`] keeps every counter, gauge and histogram sample in
//! process. [`InMemoryRecorder::export`] folds them into a [`MetricsExport`]:
//! one entry per metric name with the total over all label sets and a
//! breakdown per label set (`stage=fill-dsm`).
//!
//! ```rust
//! use lidarpipe_runner::metrics_export::InMemoryRecorder;
//!
//! let recorder = InMemoryRecorder::new();
//! metrics::with_local_recorder(&recorder, || {
//!     metrics::counter!("lidarpipe.tiles.failed", "stage" => "fill-dsm").increment(1);
//! });
//!
//! let export = recorder.export();
//! assert_eq!(export.counter("lidarpipe.tiles.failed"), 1);
//! assert_eq!(export.counter_with("lidarpipe.tiles.failed", "stage=fill-dsm"), 1);
//! ```

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct CounterCell(AtomicU64);

impl CounterFn for CounterCell {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

/// Gauge value stored as `f64` bits.
#[derive(Debug, Default)]
struct GaugeCell(AtomicU64);

impl GaugeCell {
    fn update(&self, f: impl Fn(f64) -> f64) {
        // The closure never returns None, so this cannot fail
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some(f(f64::from_bits(bits)).to_bits())
        });
    }

    fn value(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

impl GaugeFn for GaugeCell {
    fn increment(&self, value: f64) {
        self.update(|g| g + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|g| g - value);
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct HistogramCell(Mutex<Vec<f64>>);

impl HistogramFn for HistogramCell {
    fn record(&self, value: f64) {
        lock(&self.0).push(value);
    }
}

#[derive(Debug, Default)]
struct Registry {
    descriptions: Mutex<BTreeMap<String, String>>,
    counters: Mutex<HashMap<Key, Arc<CounterCell>>>,
    gauges: Mutex<HashMap<Key, Arc<GaugeCell>>>,
    histograms: Mutex<HashMap<Key, Arc<HistogramCell>>>,
}

impl Registry {
    fn describe(&self, key: KeyName, description: SharedString) {
        if !description.is_empty() {
            lock(&self.descriptions).insert(key.as_str().to_string(), description.to_string());
        }
    }
}

/// A [`Recorder`] that keeps everything in memory.
///
/// Clones share the same storage, so one clone can be installed globally and
/// another kept for [`export`](Self::export).
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecorder {
    registry: Arc<Registry>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summarize everything recorded so far.
    pub fn export(&self) -> MetricsExport {
        let mut metrics = BTreeMap::new();

        for (key, cell) in lock(&self.registry.counters).iter() {
            let value = cell.0.load(Ordering::Relaxed);
            let entry = metrics
                .entry(key.name().to_string())
                .or_insert_with(|| MetricValue::Counter {
                    total: 0,
                    labels: BTreeMap::new(),
                });
            if let MetricValue::Counter { total, labels } = entry {
                *total += value;
                if let Some(label) = label_set(key) {
                    *labels.entry(label).or_default() += value;
                }
            }
        }

        for (key, cell) in lock(&self.registry.gauges).iter() {
            let value = cell.value();
            let entry = metrics
                .entry(key.name().to_string())
                .or_insert_with(|| MetricValue::Gauge {
                    value: 0.0,
                    labels: BTreeMap::new(),
                });
            if let MetricValue::Gauge { value: sum, labels } = entry {
                *sum += value;
                if let Some(label) = label_set(key) {
                    *labels.entry(label).or_default() += value;
                }
            }
        }

        let mut samples: BTreeMap<String, (Vec<f64>, BTreeMap<String, Vec<f64>>)> = BTreeMap::new();
        for (key, cell) in lock(&self.registry.histograms).iter() {
            let recorded = lock(&cell.0).clone();
            let (all, by_label) = samples.entry(key.name().to_string()).or_default();
            all.extend_from_slice(&recorded);
            if let Some(label) = label_set(key) {
                by_label.entry(label).or_default().extend(recorded);
            }
        }
        for (name, (all, by_label)) in samples {
            let labels = by_label
                .into_iter()
                .map(|(label, values)| (label, HistogramSummary::from_samples(values)))
                .collect();
            metrics.insert(
                name,
                MetricValue::Histogram {
                    summary: HistogramSummary::from_samples(all),
                    labels,
                },
            );
        }

        MetricsExport {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            metrics,
            descriptions: lock(&self.registry.descriptions).clone(),
        }
    }
}

/// `k=v` pairs of a key, comma separated; `None` when unlabelled.
fn label_set(key: &Key) -> Option<String> {
    let pairs: Vec<String> = key
        .labels()
        .map(|l| format!("{}={}", l.key(), l.value()))
        .collect();
    (!pairs.is_empty()).then(|| pairs.join(","))
}

impl Recorder for InMemoryRecorder {
    fn describe_counter(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.registry.describe(key, description);
    }

    fn describe_gauge(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.registry.describe(key, description);
    }

    fn describe_histogram(&self, key: KeyName, _unit: Option<Unit>, description: SharedString) {
        self.registry.describe(key, description);
    }

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let cell = lock(&self.registry.counters).entry(key.clone()).or_default().clone();
        Counter::from_arc(cell)
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let cell = lock(&self.registry.gauges).entry(key.clone()).or_default().clone();
        Gauge::from_arc(cell)
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        let cell = lock(&self.registry.histograms).entry(key.clone()).or_default().clone();
        Histogram::from_arc(cell)
    }
}

/// Distribution of histogram samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

impl HistogramSummary {
    fn from_samples(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by(f64::total_cmp);
        let count = values.len();
        let sum: f64 = values.iter().sum();
        // Nearest-rank percentile
        let rank = |p: f64| values[((p * count as f64).ceil() as usize).clamp(1, count) - 1];
        Self {
            count: count as u64,
            sum,
            min: values[0],
            max: values[count - 1],
            mean: sum / count as f64,
            p50: rank(0.50),
            p90: rank(0.90),
            p99: rank(0.99),
        }
    }
}

/// One metric, totalled over its label sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
    Counter {
        total: u64,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        labels: BTreeMap<String, u64>,
    },
    Gauge {
        value: f64,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        labels: BTreeMap<String, f64>,
    },
    Histogram {
        summary: HistogramSummary,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        labels: BTreeMap<String, HistogramSummary>,
    },
}

/// Snapshot of every recorded metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    /// Seconds since the Unix epoch when the snapshot was taken.
    pub timestamp: u64,
    /// Metrics by name.
    pub metrics: BTreeMap<String, MetricValue>,
    /// Descriptions registered at startup, by metric name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub descriptions: BTreeMap<String, String>,
}

impl MetricsExport {
    /// Total of a counter; 0 when it was never incremented.
    pub fn counter(&self, name: &str) -> u64 {
        match self.metrics.get(name) {
            Some(MetricValue::Counter { total, .. }) => *total,
            _ => 0,
        }
    }

    /// Value of a counter for one label set, e.g. `stage=fetch`.
    pub fn counter_with(&self, name: &str, label_set: &str) -> u64 {
        match self.metrics.get(name) {
            Some(MetricValue::Counter { labels, .. }) => labels.get(label_set).copied().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        match self.metrics.get(name) {
            Some(MetricValue::Gauge { value, .. }) => Some(*value),
            _ => None,
        }
    }

    /// Summary of a histogram over all label sets.
    pub fn histogram(&self, name: &str) -> Option<&HistogramSummary> {
        match self.metrics.get(name) {
            Some(MetricValue::Histogram { summary, .. }) => Some(summary),
            _ => None,
        }
    }

    /// Summary of a histogram for one label set.
    pub fn histogram_with(&self, name: &str, label_set: &str) -> Option<&HistogramSummary> {
        match self.metrics.get(name) {
            Some(MetricValue::Histogram { labels, .. }) => labels.get(label_set),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
