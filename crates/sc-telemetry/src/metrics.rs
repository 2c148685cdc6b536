//! Prometheus metrics for the peer routing layer.
//!
//! All metrics follow the naming convention: `sc_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., peer_messages_sent_total)
//! - **Gauge**: Value that can go up or down (e.g., peers_active)
//! - **Histogram**: Distribution of values (e.g., peer_send_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PEER METRICS
    // =========================================================================

    /// Peers currently bound to a connection
    pub static ref PEERS_ACTIVE: Gauge = Gauge::new(
        "sc_peers_active",
        "Number of peers currently bound to a connection"
    ).expect("metric creation failed");

    /// Envelopes written to peer connections
    pub static ref MESSAGES_SENT: Counter = Counter::new(
        "sc_peer_messages_sent_total",
        "Total envelopes successfully written to peer connections"
    ).expect("metric creation failed");

    /// Envelopes read from peer connections
    pub static ref MESSAGES_RECEIVED: Counter = Counter::new(
        "sc_peer_messages_received_total",
        "Total envelopes read from peer connections"
    ).expect("metric creation failed");

    /// Envelopes no subscriber matched
    pub static ref UNHANDLED_MESSAGES: Counter = Counter::new(
        "sc_peer_unhandled_messages_total",
        "Total inbound envelopes that matched no subscription"
    ).expect("metric creation failed");

    /// Failed sends by reason
    pub static ref SEND_FAILURES: CounterVec = CounterVec::new(
        Opts::new("sc_peer_send_failures_total", "Failed peer sends"),
        &["reason"]  // reason: not_ready/cancelled/closed/connection
    ).expect("metric creation failed");

    /// Send duration
    pub static ref SEND_DURATION: Histogram = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "sc_peer_send_duration_seconds",
            "Time from send call to write completion"
        ).buckets(exponential_buckets(0.0001, 2.0, 15).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // REGISTRY METRICS
    // =========================================================================

    /// Dial attempts by outcome
    pub static ref DIAL_ATTEMPTS: CounterVec = CounterVec::new(
        Opts::new("sc_registry_dial_attempts_total", "Outbound dial attempts"),
        &["outcome"]  // outcome: success/failed/superseded
    ).expect("metric creation failed");
}

/// Handle for the metrics registry
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
///
/// Registering more than once is accepted; metrics already present are kept.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Peers
        Box::new(PEERS_ACTIVE.clone()),
        Box::new(MESSAGES_SENT.clone()),
        Box::new(MESSAGES_RECEIVED.clone()),
        Box::new(UNHANDLED_MESSAGES.clone()),
        Box::new(SEND_FAILURES.clone()),
        Box::new(SEND_DURATION.clone()),
        // Registry
        Box::new(DIAL_ATTEMPTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_idempotent() {
        assert!(register_metrics().is_ok());
        assert!(register_metrics().is_ok());
    }

    #[test]
    fn test_gauge_set() {
        PEERS_ACTIVE.set(3.0);
        assert_eq!(PEERS_ACTIVE.get(), 3.0);
        PEERS_ACTIVE.set(0.0);
    }

    #[test]
    fn test_encode_contains_metric_names() {
        register_metrics().unwrap();
        MESSAGES_RECEIVED.inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("sc_peer_messages_received_total"));
    }

    #[test]
    fn test_histogram_timer() {
        let before = SEND_DURATION.get_sample_count();
        {
            let _timer = HistogramTimer::new(&SEND_DURATION);
        }
        assert!(SEND_DURATION.get_sample_count() > before);
    }
}
