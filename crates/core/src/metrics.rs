//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Pipeline runs (outcome per variant)
//! - Worker invocations (counts, duration, tokens in use)
//! - Forwarded results

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Pipeline runs
// =============================================================================

/// Pipeline runs total by variant and result.
pub static PIPELINE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("nutsandbolts_pipeline_runs_total", "Total pipeline runs"),
        &["variant", "result"], // variant: "sink", "forward"; result: "completed", "aborted"
    )
    .unwrap()
});

/// Items received from input queues.
pub static ITEMS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nutsandbolts_items_received_total",
        "Total items received from input queues",
    )
    .unwrap()
});

/// Results sent to output queues.
pub static RESULTS_FORWARDED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nutsandbolts_results_forwarded_total",
        "Total results forwarded to output queues",
    )
    .unwrap()
});

// =============================================================================
// Workers
// =============================================================================

/// Worker invocations total by result.
pub static WORKER_INVOCATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "nutsandbolts_worker_invocations_total",
            "Total worker function invocations",
        ),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

/// Worker tokens currently held by running invocations.
pub static ACTIVE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "nutsandbolts_active_workers",
        "Worker tokens currently in use",
    )
    .unwrap()
});

/// Worker invocation duration in seconds.
pub static WORKER_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "nutsandbolts_worker_duration_seconds",
            "Duration of worker function invocations",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0,
        ]),
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(PIPELINE_RUNS.clone()),
        Box::new(ITEMS_RECEIVED.clone()),
        Box::new(RESULTS_FORWARDED.clone()),
        Box::new(WORKER_INVOCATIONS.clone()),
        Box::new(ACTIVE_WORKERS.clone()),
        Box::new(WORKER_DURATION.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_all_metrics_register() {
        let registry = Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        PIPELINE_RUNS.with_label_values(&["sink", "completed"]).inc();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"nutsandbolts_pipeline_runs_total".to_string()));
    }
}
