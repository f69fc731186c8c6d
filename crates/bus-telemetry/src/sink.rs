//! Prometheus-backed [`MetricsSink`].

use layer_bus::{BusCounter, MessageKind, MetricsSink, TraceOutcome, TraceRecord};
use std::time::Duration;

use crate::metrics::{BUS_DISPATCH_DURATION, BUS_EVENT_HANDLERS, BUS_MESSAGES, BUS_TRACES};

/// Forwards bus counters to the process-wide Prometheus statics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusSink;

impl PrometheusSink {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn outcome_label(outcome: &TraceOutcome) -> &'static str {
    match outcome {
        TraceOutcome::Delivered { .. } => "delivered",
        TraceOutcome::Completed => "completed",
        TraceOutcome::CacheHit => "cache_hit",
        TraceOutcome::Rejected => "rejected",
        TraceOutcome::Failed { .. } => "failed",
        TraceOutcome::TimedOut => "timed_out",
    }
}

impl MetricsSink for PrometheusSink {
    fn increment(&self, counter: BusCounter, kind: MessageKind, payload_type: &str, amount: u64) {
        BUS_MESSAGES
            .with_label_values(&[counter.as_str(), kind.as_str(), payload_type])
            .inc_by(amount);
    }

    fn observe_latency(&self, kind: MessageKind, payload_type: &str, latency: Duration) {
        BUS_DISPATCH_DURATION
            .with_label_values(&[kind.as_str(), payload_type])
            .observe(latency.as_secs_f64());
    }

    fn record_handler_count(&self, payload_type: &str, count: usize) {
        BUS_EVENT_HANDLERS
            .with_label_values(&[payload_type])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    fn record_trace(&self, record: &TraceRecord) {
        BUS_TRACES
            .with_label_values(&[record.kind.as_str(), outcome_label(&record.outcome)])
            .inc();
    }
}
