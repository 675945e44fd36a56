//! Metric declarations for the runner.
//!
//! Metrics go through the `metrics` facade. Nothing is exported unless the
//! embedding application installs a recorder; without one every call is a
//! no-op. The `lidarpipe` binary installs
//! [`InMemoryRecorder`](crate::metrics_export::InMemoryRecorder) when asked
//! for a metrics summary.
//!
//! ```rust
//! use lidarpipe_runner::metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const RETRIES: Metric = Metric::counter("lidarpipe.fetch.retries")
//!     .with_description("Download retries")
//!     .with_unit(Unit::Count);
//!
//! assert_eq!(RETRIES.kind, MetricKind::Counter);
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "lidarpipe.tiles.completed").
    pub name: &'static str,
    /// The kind of metric.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// The unit of measurement (optional).
    pub unit: Option<Unit>,
}

impl Metric {
    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
        }
    }

    /// Creates a new counter metric with the given name.
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    /// Creates a new gauge metric with the given name.
    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    /// Creates a new histogram metric with the given name.
    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    /// Sets the description for the metric.
    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Sets the unit for the metric.
    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => describe_counter!(self.name, unit, self.description),
            (MetricKind::Counter, None) => describe_counter!(self.name, self.description),
            (MetricKind::Gauge, Some(unit)) => describe_gauge!(self.name, unit, self.description),
            (MetricKind::Gauge, None) => describe_gauge!(self.name, self.description),
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description)
            }
            (MetricKind::Histogram, None) => describe_histogram!(self.name, self.description),
        }
    }
}

/// All metrics recorded by the runner.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Tiles whose every stage succeeded.
    pub const TILES_COMPLETED: Metric = Metric::counter("lidarpipe.tiles.completed")
        .with_description("Tiles processed successfully")
        .with_unit(Unit::Count);

    /// Tiles abandoned after a stage failure.
    ///
    /// Labels: stage
    pub const TILES_FAILED: Metric = Metric::counter("lidarpipe.tiles.failed")
        .with_description("Tiles abandoned after a failure")
        .with_unit(Unit::Count);

    /// Tiles stopped by cancellation.
    pub const TILES_CANCELLED: Metric = Metric::counter("lidarpipe.tiles.cancelled")
        .with_description("Tiles stopped by cancellation")
        .with_unit(Unit::Count);

    /// Wall time of each stage run.
    ///
    /// Labels: stage
    pub const STAGE_DURATION: Metric = Metric::histogram("lidarpipe.stage.duration_seconds")
        .with_description("Stage wall time")
        .with_unit(Unit::Seconds);

    /// Bytes written by tile downloads.
    pub const FETCHED_BYTES: Metric = Metric::counter("lidarpipe.fetch.bytes")
        .with_description("Bytes downloaded")
        .with_unit(Unit::Bytes);

    /// Intermediate artifacts removed by cleanup.
    pub const ARTIFACTS_DELETED: Metric = Metric::counter("lidarpipe.cleanup.deleted")
        .with_description("Intermediate artifacts deleted")
        .with_unit(Unit::Count);

    /// Workers currently running a tile.
    pub const ACTIVE_WORKERS: Metric = Metric::gauge("lidarpipe.workers.active")
        .with_description("Workers currently processing a tile")
        .with_unit(Unit::Count);

    /// Every metric, for [`describe_metrics`](super::describe_metrics).
    pub const ALL: &[Metric] = &[
        TILES_COMPLETED,
        TILES_FAILED,
        TILES_CANCELLED,
        STAGE_DURATION,
        FETCHED_BYTES,
        ARTIFACTS_DELETED,
        ACTIVE_WORKERS,
    ];
}

/// Register descriptions for every runner metric. Call once at startup, after
/// installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_builder() {
        const M: Metric = Metric::histogram("x.y")
            .with_description("d")
            .with_unit(Unit::Seconds);
        assert_eq!(M.name, "x.y");
        assert_eq!(M.kind, MetricKind::Histogram);
        assert_eq!(M.description, "d");
        assert_eq!(M.unit, Some(Unit::Seconds));
    }

    #[test]
    fn test_metric_names_unique() {
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
    }

    #[test]
    fn test_describe_without_recorder() {
        // No recorder installed: must be a no-op
        describe_metrics();
    }
}
