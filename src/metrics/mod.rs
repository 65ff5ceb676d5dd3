//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Scan progress and gaps per chain
//! - Ledger admissions and relay outcomes
//! - Submission attempts and RPC failures
//!
//! A pass is short-lived, so metrics are written to a node-exporter textfile
//! instead of being served.

use crate::chain::ChainRole;
use crate::error::{RelayerError, RelayerResult};

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::path::Path;
use tracing::debug;

lazy_static! {
    // Scan metrics
    pub static ref LAST_SCANNED_BLOCK: GaugeVec = register_gauge_vec!(
        "warden_last_scanned_block",
        "Upper bound of the last scanned window",
        &["chain"]
    ).unwrap();

    pub static ref SCAN_GAPS: CounterVec = register_counter_vec!(
        "warden_scan_gaps_total",
        "Block ranges that could not be scanned",
        &["chain"]
    ).unwrap();

    pub static ref SCAN_GAP_BLOCKS: CounterVec = register_counter_vec!(
        "warden_scan_gap_blocks_total",
        "Blocks skipped because their logs could not be fetched",
        &["chain"]
    ).unwrap();

    pub static ref RPC_FAILURES: CounterVec = register_counter_vec!(
        "warden_rpc_failures_total",
        "Failed RPC requests by method",
        &["chain", "method"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_FOUND: CounterVec = register_counter_vec!(
        "warden_events_found_total",
        "Bridge events found in scanned windows",
        &["chain", "event_type"]
    ).unwrap();

    pub static ref EVENTS_ADMITTED: CounterVec = register_counter_vec!(
        "warden_events_admitted_total",
        "Events admitted by the dedup ledger",
        &["chain"]
    ).unwrap();

    // Relay metrics
    pub static ref RELAY_OUTCOMES: CounterVec = register_counter_vec!(
        "warden_relay_outcomes_total",
        "Final outcome of each admitted event",
        &["chain", "outcome"]
    ).unwrap();

    pub static ref SUBMIT_ATTEMPTS: CounterVec = register_counter_vec!(
        "warden_submit_attempts_total",
        "Raw transaction submissions, including retries",
        &["chain"]
    ).unwrap();

    pub static ref PASS_DURATION: HistogramVec = register_histogram_vec!(
        "warden_pass_duration_seconds",
        "Wall time of a scan pass",
        &["chain"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();
}

/// Write every registered metric to `path` in the text exposition format.
pub fn write_textfile(path: &Path) -> RelayerResult<()> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| RelayerError::Internal(format!("metrics encoding failed: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| RelayerError::Internal(format!("metrics dir {:?}: {}", parent, e)))?;
    }
    // Rename so collectors never read a half-written file
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, &buffer)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| RelayerError::Internal(format!("metrics write {:?}: {}", path, e)))?;

    debug!("Wrote metrics to {:?}", path);
    Ok(())
}

// Helper functions to record metrics

pub fn record_scanned_to(chain: ChainRole, block_number: u64) {
    LAST_SCANNED_BLOCK
        .with_label_values(&[chain.as_str()])
        .set(block_number as f64);
}

pub fn record_scan_gap(chain: ChainRole, blocks: u64) {
    SCAN_GAPS.with_label_values(&[chain.as_str()]).inc();
    SCAN_GAP_BLOCKS
        .with_label_values(&[chain.as_str()])
        .inc_by(blocks as f64);
}

pub fn record_rpc_failure(chain: ChainRole, method: &str) {
    RPC_FAILURES
        .with_label_values(&[chain.as_str(), method])
        .inc();
}

pub fn record_events_found(chain: ChainRole, event_type: &str, count: usize) {
    EVENTS_FOUND
        .with_label_values(&[chain.as_str(), event_type])
        .inc_by(count as f64);
}

pub fn record_admitted(chain: ChainRole) {
    EVENTS_ADMITTED.with_label_values(&[chain.as_str()]).inc();
}

pub fn record_outcome(chain: ChainRole, outcome: &str) {
    RELAY_OUTCOMES
        .with_label_values(&[chain.as_str(), outcome])
        .inc();
}

pub fn record_submit_attempt(chain: ChainRole) {
    SUBMIT_ATTEMPTS.with_label_values(&[chain.as_str()]).inc();
}

pub fn record_pass_duration(chain: ChainRole, secs: f64) {
    PASS_DURATION
        .with_label_values(&[chain.as_str()])
        .observe(secs);
}
