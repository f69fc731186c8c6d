//! # Layer Bus - In-Process Message Bus
//!
//! Type-safe events, commands and queries routed between architectural
//! layers.
//!
//! ## Message Kinds
//!
//! ```text
//!   publish(Event<T>)            send(Command<T>)           query(Query<T, R>)
//!         │                            │                            │
//!         ▼                            ▼                            ▼
//!  ┌─────────────┐              ┌─────────────┐              ┌─────────────┐
//!  │ route check │              │ route check │              │ route check │
//!  └──────┬──────┘              └──────┬──────┘              └──────┬──────┘
//!         │                            │                     cache hit? ──► Response
//!    fan-out to N                one handler                  one handler
//!    (concurrent)              raced vs timeout            raced vs timeout
//!         │                            │                            │
//!         ▼                            ▼                            ▼
//!   handled count                 Result<O>                  Response<R>
//! ```
//!
//! ## Routing
//!
//! Every message carries a source layer and an optional destination. The
//! `LayerGraph` decides which edges are allowed; see `bus_types::layer`.
//!
//! ## Observability
//!
//! Counters are kept in-process (`MessageBus::metrics`) and mirrored to an
//! injected `MetricsSink`. Dispatch detail is logged through `tracing`.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod cache;
pub mod core;
pub mod facade;
pub mod handler;
pub mod metrics;
pub mod registration;
pub mod registry;
pub mod transport;

pub use cache::{derive_cache_key, CacheStatistics, QueryCache, MAX_CACHE_TTL};
pub use self::core::BusCore;
pub use facade::{MessageBus, MessageBusBuilder};
pub use handler::{
    CommandHandler, EventHandler, FnCommandHandler, FnEventHandler, FnQueryHandler, QueryHandler,
    WeakEventHandler,
};
pub use metrics::{
    BusCounter, BusMetrics, MetricsSink, MetricsSnapshot, NoopSink, TraceOutcome, TraceRecord,
};
pub use registration::Registration;
pub use registry::{
    HandlerRegistry, Liveness, RegistrationId, RegistrationOptions, RegistryIntrospection,
};
pub use transport::{EnvelopeStream, LoopbackTransport, Transport, TransportError, WireEnvelope};

pub use bus_types::{
    BoxError, BusConfig, BusError, BusResult, Command, Envelope, Event, HandlerResult, Layer,
    LayerGraph, Message, MessageKind, Query, Response, RoutingViolation,
};
