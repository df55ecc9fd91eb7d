// SPDX-License-Identifier: MIT

//! Observability seam for the controller's loops and invariant audit task.
//! Mirrors the adapter-trait-plus-fake pattern used elsewhere in the
//! teacher's codebase for things the core must call but never own (here:
//! wherever metrics end up, Prometheus, statsd, a log line).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Observation sink for counters, gauges, and histograms emitted by the
/// daemon. Implementations must be cheap to call from hot loops — the
/// controller calls these inline, not from a background task.
pub trait Metrics: Send + Sync {
    fn incr_counter(&self, name: &'static str, value: u64);
    fn set_gauge(&self, name: &'static str, value: f64);
    fn record_histogram(&self, name: &'static str, value: f64);
}

/// Discards every observation. The default when no metrics sink is wired.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr_counter(&self, _name: &'static str, _value: u64) {}
    fn set_gauge(&self, _name: &'static str, _value: f64) {}
    fn record_histogram(&self, _name: &'static str, _value: f64) {}
}

/// Records every observation in memory for test assertions.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<&'static str, u64>>,
    gauges: Mutex<HashMap<&'static str, f64>>,
    histograms: Mutex<HashMap<&'static str, Vec<f64>>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn counter(&self, name: &'static str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &'static str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }

    pub fn histogram_values(&self, name: &'static str) -> Vec<f64> {
        self.histograms.lock().get(name).cloned().unwrap_or_default()
    }
}

impl Metrics for RecordingMetrics {
    fn incr_counter(&self, name: &'static str, value: u64) {
        *self.counters.lock().entry(name).or_insert(0) += value;
    }

    fn set_gauge(&self, name: &'static str, value: f64) {
        self.gauges.lock().insert(name, value);
    }

    fn record_histogram(&self, name: &'static str, value: f64) {
        self.histograms.lock().entry(name).or_default().push(value);
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
