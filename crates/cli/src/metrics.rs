//! Prometheus metrics for the command-line front end.
//!
//! The registry holds the core pipeline metrics plus the digest counters
//! defined here.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Files digested.
pub static FILES_DIGESTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("nutsandbolts_files_digested_total", "Total files digested").unwrap()
});

/// Bytes read while digesting.
pub static BYTES_DIGESTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "nutsandbolts_bytes_digested_total",
        "Total bytes read while digesting files",
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    registry.register(Box::new(FILES_DIGESTED.clone())).unwrap();
    registry.register(Box::new(BYTES_DIGESTED.clone())).unwrap();

    for metric in nutsandbolts_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_core_and_cli_metrics() {
        FILES_DIGESTED.inc();
        nutsandbolts_core::metrics::ITEMS_RECEIVED.inc();

        let text = encode_metrics().unwrap();
        assert!(text.contains("nutsandbolts_files_digested_total"));
        assert!(text.contains("nutsandbolts_items_received_total"));
    }
}
