//! Shared payload types and helpers for the integration scenarios.

use layer_bus::{
    BusConfig, BusCounter, MessageBus, MessageKind, MetricsSink, TraceRecord,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserCreated {
    pub user_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateUser {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GetUser {
    pub user_id: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserView {
    pub user_id: u64,
    pub name: String,
}

/// Command whose handler never finishes.
#[derive(Debug, Clone, Serialize)]
pub struct Stall;

pub fn user_created(user_id: u64) -> UserCreated {
    UserCreated {
        user_id,
        name: format!("user-{user_id}"),
    }
}

// =============================================================================
// BUS CONSTRUCTORS
// =============================================================================

pub fn bus_with(config: BusConfig) -> MessageBus {
    MessageBus::builder()
        .config(config)
        .build()
        .expect("valid test config")
}

pub fn recorded_bus(config: BusConfig) -> (MessageBus, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let bus = MessageBus::builder()
        .config(config)
        .metrics_sink(sink.clone())
        .build()
        .expect("valid test config");
    (bus, sink)
}

pub fn short_timeouts() -> BusConfig {
    BusConfig {
        default_command_timeout: Duration::from_millis(500),
        default_query_timeout: Duration::from_millis(500),
        event_handler_timeout: Some(Duration::from_secs(1)),
        ..BusConfig::default()
    }
}

// =============================================================================
// COUNTERS
// =============================================================================

/// Shared invocation counter for handler closures.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Sink that keeps everything it is handed.
#[derive(Default)]
pub struct RecordingSink {
    pub increments: Mutex<Vec<(BusCounter, MessageKind, String, u64)>>,
    pub latencies: Mutex<Vec<(MessageKind, String, Duration)>>,
    pub handler_counts: Mutex<Vec<(String, usize)>>,
    pub traces: Mutex<Vec<TraceRecord>>,
}

impl RecordingSink {
    /// Sum of all increments of `counter`.
    pub fn total(&self, counter: BusCounter) -> u64 {
        self.increments
            .lock()
            .iter()
            .filter(|(c, ..)| *c == counter)
            .map(|(.., amount)| amount)
            .sum()
    }
}

impl MetricsSink for RecordingSink {
    fn increment(&self, counter: BusCounter, kind: MessageKind, payload_type: &str, amount: u64) {
        self.increments
            .lock()
            .push((counter, kind, payload_type.to_string(), amount));
    }

    fn observe_latency(&self, kind: MessageKind, payload_type: &str, latency: Duration) {
        self.latencies
            .lock()
            .push((kind, payload_type.to_string(), latency));
    }

    fn record_handler_count(&self, payload_type: &str, count: usize) {
        self.handler_counts
            .lock()
            .push((payload_type.to_string(), count));
    }

    fn record_trace(&self, record: &TraceRecord) {
        self.traces.lock().push(record.clone());
    }
}
