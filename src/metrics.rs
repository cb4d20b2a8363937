//! Prometheus metrics for the bridge reconciler
//!
//! Exposed on the /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Scan progress
    pub static ref CHUNKS_PROCESSED: CounterVec = register_counter_vec!(
        "reconciler_chunks_processed_total",
        "Total number of block chunks committed",
        &["chain", "event"]
    ).unwrap();

    pub static ref LOWEST_SCANNED_BLOCK: GaugeVec = register_gauge_vec!(
        "reconciler_lowest_scanned_block",
        "Lowest block covered by the backward scan",
        &["chain", "event"]
    ).unwrap();

    pub static ref CHUNK_DURATION: HistogramVec = register_histogram_vec!(
        "reconciler_chunk_duration_seconds",
        "Time to fetch, store and match one chunk",
        &["chain"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Events
    pub static ref EVENTS_INSERTED: CounterVec = register_counter_vec!(
        "reconciler_events_inserted_total",
        "Total number of deposit events stored",
        &["chain", "event"]
    ).unwrap();

    pub static ref MATCHES: CounterVec = register_counter_vec!(
        "reconciler_matches_total",
        "Total number of L1/L2 deposit pairs linked",
        &["chain"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "reconciler_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "reconciler_up",
        "Whether the reconciler is up and running"
    ).unwrap();
}

/// Record a committed chunk
pub fn record_chunk_processed(chain: &str, event: &str, lowest_block: u64, seconds: f64) {
    CHUNKS_PROCESSED.with_label_values(&[chain, event]).inc();
    LOWEST_SCANNED_BLOCK
        .with_label_values(&[chain, event])
        .set(lowest_block as f64);
    CHUNK_DURATION.with_label_values(&[chain]).observe(seconds);
}

/// Record stored events
pub fn record_events_inserted(chain: &str, event: &str, count: u64) {
    EVENTS_INSERTED
        .with_label_values(&[chain, event])
        .inc_by(count as f64);
}

/// Record linked pairs; `chain` is the side whose insert made the match
pub fn record_matches(chain: &str, count: u64) {
    MATCHES.with_label_values(&[chain]).inc_by(count as f64);
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}
