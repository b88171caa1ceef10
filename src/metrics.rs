//! Metrics and observability for the batching engine.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metrics collector for one engine instance
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    /// Engine instance name for labeling
    engine_name: String,
}

impl EngineMetrics {
    /// Create a new metrics collector
    pub fn new(engine_name: impl Into<String>) -> Self {
        Self::register_metrics();

        Self {
            engine_name: engine_name.into(),
        }
    }

    /// Register metric descriptions
    fn register_metrics() {
        // Counters
        describe_counter!(
            "flowbin_records_binned_total",
            "Total number of records admitted into bins"
        );
        describe_counter!(
            "flowbin_bins_processed_total",
            "Total number of bins handed to the processing hook"
        );
        describe_counter!(
            "flowbin_bins_force_evicted_total",
            "Total number of bins force-evicted because the manager was at capacity"
        );
        describe_counter!(
            "flowbin_oversized_records_total",
            "Total number of records routed through a dedicated one-record bin"
        );
        describe_counter!(
            "flowbin_process_failures_total",
            "Total number of bin processing failures, by kind"
        );

        // Histograms
        describe_histogram!(
            "flowbin_bin_entry_count",
            "Number of records in each processed bin"
        );
        describe_histogram!(
            "flowbin_bin_size_bytes",
            "Total byte size of each processed bin"
        );
        describe_histogram!(
            "flowbin_process_duration_seconds",
            "Time spent in the processing hook per bin"
        );

        // Gauges
        describe_gauge!("flowbin_active_bins", "Current number of active bins");
        describe_gauge!(
            "flowbin_ready_bins",
            "Current number of bins awaiting processing"
        );
        describe_gauge!(
            "flowbin_health",
            "Engine health status (1 = running, 0 = stopped)"
        );
    }

    /// Record records admitted into bins this tick
    pub fn record_binned(&self, count: usize) {
        counter!(
            "flowbin_records_binned_total",
            "engine" => self.engine_name.clone(),
        )
        .increment(count as u64);
    }

    /// Record a bin handed to the processing hook
    pub fn record_bin_processed(&self, entries: usize, size_bytes: u64) {
        counter!(
            "flowbin_bins_processed_total",
            "engine" => self.engine_name.clone(),
        )
        .increment(1);
        histogram!(
            "flowbin_bin_entry_count",
            "engine" => self.engine_name.clone(),
        )
        .record(entries as f64);
        histogram!(
            "flowbin_bin_size_bytes",
            "engine" => self.engine_name.clone(),
        )
        .record(size_bytes as f64);
    }

    /// Record a forced oldest-bin eviction
    pub fn record_force_eviction(&self) {
        counter!(
            "flowbin_bins_force_evicted_total",
            "engine" => self.engine_name.clone(),
        )
        .increment(1);
    }

    /// Record a record routed through a dedicated one-record bin
    pub fn record_oversized(&self) {
        counter!(
            "flowbin_oversized_records_total",
            "engine" => self.engine_name.clone(),
        )
        .increment(1);
    }

    /// Record a processing failure of the given kind ("recoverable"/"unrecoverable")
    pub fn record_process_failure(&self, kind: &str) {
        counter!(
            "flowbin_process_failures_total",
            "engine" => self.engine_name.clone(),
            "kind" => kind.to_string(),
        )
        .increment(1);
    }

    /// Record time spent in the processing hook
    pub fn record_process_duration(&self, duration: Duration) {
        histogram!(
            "flowbin_process_duration_seconds",
            "engine" => self.engine_name.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Set the current active bin count
    pub fn set_active_bins(&self, count: usize) {
        gauge!(
            "flowbin_active_bins",
            "engine" => self.engine_name.clone(),
        )
        .set(count as f64);
    }

    /// Set the current ready bin count
    pub fn set_ready_bins(&self, count: usize) {
        gauge!(
            "flowbin_ready_bins",
            "engine" => self.engine_name.clone(),
        )
        .set(count as f64);
    }

    /// Set engine health status
    pub fn set_health(&self, healthy: bool) {
        gauge!(
            "flowbin_health",
            "engine" => self.engine_name.clone(),
        )
        .set(if healthy { 1.0 } else { 0.0 });
    }
}
