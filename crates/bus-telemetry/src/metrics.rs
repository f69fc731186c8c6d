//! Prometheus metrics for the message bus.
//!
//! All metrics follow the naming convention: `layer_bus_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: bus counters by kind and payload type (`layer_bus_messages_total`)
//! - **Gauge**: handlers reached by the last dispatch of an event type
//! - **Histogram**: dispatch latency (`layer_bus_dispatch_duration_seconds`)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Registry holding every bus metric
    pub static ref REGISTRY: Registry = Registry::new();

    /// Bus counters: published, processed, errors, timeouts, cache hits/misses, routing violations
    pub static ref BUS_MESSAGES: IntCounterVec = IntCounterVec::new(
        Opts::new("layer_bus_messages_total", "Bus counters by message kind and payload type"),
        &["counter", "kind", "payload_type"]
    ).expect("metric creation failed");

    /// Dispatch latency
    pub static ref BUS_DISPATCH_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "layer_bus_dispatch_duration_seconds",
            "Time from submission to completion of a bus operation"
        ).buckets(exponential_buckets(0.00005, 2.0, 16).expect("valid buckets")),
        &["kind", "payload_type"]
    ).expect("metric creation failed");

    /// Handlers reached by the most recent publish of each event type
    pub static ref BUS_EVENT_HANDLERS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("layer_bus_event_handlers", "Handlers reached by the last publish of an event type"),
        &["payload_type"]
    ).expect("metric creation failed");

    /// Trace records by outcome
    pub static ref BUS_TRACES: IntCounterVec = IntCounterVec::new(
        Opts::new("layer_bus_traces_total", "Traced bus operations by outcome"),
        &["kind", "outcome"]
    ).expect("metric creation failed");
}

/// Keeps the metrics registry referenced while telemetry is active
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all bus metrics with [`REGISTRY`].
///
/// Calling this more than once is harmless.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(BUS_MESSAGES.clone()),
        Box::new(BUS_DISPATCH_DURATION.clone()),
        Box::new(BUS_EVENT_HANDLERS.clone()),
        Box::new(BUS_TRACES.clone()),
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
