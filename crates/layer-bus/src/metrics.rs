//! # Bus Metrics
//!
//! Running counters kept by the core, plus the sink boundary that
//! exporters implement. Counters are lock-free atomics outside the state
//! lock; the core never stores or exports samples itself.

use bus_types::MessageKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Counter names forwarded to a [`MetricsSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BusCounter {
    Published,
    Processed,
    Errors,
    Timeouts,
    CacheHits,
    CacheMisses,
    RoutingViolations,
}

impl BusCounter {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Processed => "processed",
            Self::Errors => "errors",
            Self::Timeouts => "timeouts",
            Self::CacheHits => "cache_hits",
            Self::CacheMisses => "cache_misses",
            Self::RoutingViolations => "routing_violations",
        }
    }
}

/// How one bus operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    /// Event delivered; `handled` of the dispatched handlers succeeded.
    Delivered { handled: usize },
    /// Command or query handler returned successfully.
    Completed,
    /// Query served from cache without invoking a handler.
    CacheHit,
    /// Dropped or rejected for a routing violation.
    Rejected,
    Failed { reason: String },
    TimedOut,
}

/// Structured record of one bus operation, emitted when tracing is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRecord {
    pub message_id: Uuid,
    pub correlation_id: String,
    pub kind: MessageKind,
    pub payload_type: String,
    pub handler_count: usize,
    pub duration: Duration,
    pub outcome: TraceOutcome,
}

/// External consumer of bus counters and trace records.
///
/// Called outside the state lock, possibly from many tasks at once.
pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, counter: BusCounter, kind: MessageKind, payload_type: &str, amount: u64);

    fn observe_latency(&self, kind: MessageKind, payload_type: &str, latency: Duration);

    /// Number of handlers a single event dispatch fanned out to.
    fn record_handler_count(&self, payload_type: &str, count: usize);

    fn record_trace(&self, record: &TraceRecord);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn increment(&self, _: BusCounter, _: MessageKind, _: &str, _: u64) {}

    fn observe_latency(&self, _: MessageKind, _: &str, _: Duration) {}

    fn record_handler_count(&self, _: &str, _: usize) {}

    fn record_trace(&self, _: &TraceRecord) {}
}

/// In-process running counters.
#[derive(Debug, Default)]
pub struct BusMetrics {
    published: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    routing_violations: AtomicU64,
    total_latency_micros: AtomicU64,
}

impl BusMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, counter: BusCounter, amount: u64) {
        let cell = match counter {
            BusCounter::Published => &self.published,
            BusCounter::Processed => &self.processed,
            BusCounter::Errors => &self.errors,
            BusCounter::Timeouts => &self.timeouts,
            BusCounter::CacheHits => &self.cache_hits,
            BusCounter::CacheMisses => &self.cache_misses,
            BusCounter::RoutingViolations => &self.routing_violations,
        };
        cell.fetch_add(amount, Ordering::Relaxed);
    }

    pub(crate) fn add_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            routing_violations: self.routing_violations.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.total_latency_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Copy of [`BusMetrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Messages accepted for dispatch (events published, commands sent,
    /// queries issued).
    pub published: u64,
    /// Successful handler completions, plus queries served from cache.
    pub processed: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub routing_violations: u64,
    pub total_latency: Duration,
}

impl MetricsSnapshot {
    /// Mean latency per processed message.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        if self.processed == 0 {
            return Duration::ZERO;
        }
        let micros = self.total_latency.as_micros() / u128::from(self.processed);
        Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }
}
