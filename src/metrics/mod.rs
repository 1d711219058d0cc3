//! Prometheus metrics for the discovery engine
//!
//! This module provides metrics tracking for:
//! - Governance: quota units debited, permits denied, breaker transitions
//! - Discovery: records surfaced per source, probe hits, operation duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

use crate::models::SourceKind;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all engine metrics
struct EngineMetrics {
    units_debited: CounterVec,
    permits_denied: CounterVec,
    breaker_transitions: CounterVec,
    records_discovered: CounterVec,
    probe_hits: CounterVec,
    operation_duration: HistogramVec,
}

/// Global storage for engine metrics
static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = obscura::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = EngineMetrics {
        units_debited: register_counter_vec!(
            "obscura_quota_units_debited_total",
            "Quota units debited per source",
            &["source"]
        )?,
        permits_denied: register_counter_vec!(
            "obscura_permits_denied_total",
            "Permits denied per source and reason",
            &["source", "reason"]
        )?,
        breaker_transitions: register_counter_vec!(
            "obscura_breaker_transitions_total",
            "Circuit breaker transitions per source and target state",
            &["source", "state"]
        )?,
        records_discovered: register_counter_vec!(
            "obscura_records_discovered_total",
            "Records returned to callers per source",
            &["source"]
        )?,
        probe_hits: register_counter_vec!(
            "obscura_probe_hits_total",
            "Brute-force candidates that resolved to live content",
            &["mode"]
        )?,
        operation_duration: register_histogram_vec!(
            "obscura_operation_duration_seconds",
            "Duration of top-level engine operations in seconds",
            &["operation"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]
        )?,
    };

    ENGINE_METRICS
        .set(metrics)
        .map_err(|_| "Engine metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    ENGINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record units debited from a source's budget
pub fn record_units_debited(source: SourceKind, units: u64) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.units_debited
            .with_label_values(&[source.as_str()])
            .inc_by(units as f64);
    }
}

/// Record a denied permit
pub fn record_permit_denied(source: SourceKind, reason: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.permits_denied
            .with_label_values(&[source.as_str(), reason])
            .inc();
    }
}

/// Record a breaker state change
pub fn record_breaker_transition(source: SourceKind, state: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.breaker_transitions
            .with_label_values(&[source.as_str(), state])
            .inc();
    }
}

/// Record records surfaced from a source
pub fn record_discovered(source: SourceKind, count: usize) {
    let Some(m) = ENGINE_METRICS.get() else {
        return;
    };

    if count > 0 {
        m.records_discovered
            .with_label_values(&[source.as_str()])
            .inc_by(count as f64);
    }
}

/// Record probe hits
pub fn record_probe_hits(mode: &str, hits: usize) {
    let Some(m) = ENGINE_METRICS.get() else {
        return;
    };

    if hits > 0 {
        m.probe_hits.with_label_values(&[mode]).inc_by(hits as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an operation timer (records when dropped)
pub fn start_operation_timer(operation: &str) -> MetricsTimer {
    match ENGINE_METRICS.get() {
        Some(m) => MetricsTimer::new(
            m.operation_duration
                .with_label_values(&[operation])
                .start_timer(),
        ),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
